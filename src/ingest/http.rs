// src/ingest/http.rs
//! Outbound page/API fetching behind a trait, so adapters can run against fixtures.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::error::FetchError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl PageRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// GET the request and return the body text. Non-2xx maps into [`FetchError`].
    async fn get(&self, req: &PageRequest) -> Result<String, FetchError>;
}

/// `reqwest`-backed fetcher used in production.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(5).min(timeout))
            .timeout(timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn get(&self, req: &PageRequest) -> Result<String, FetchError> {
        let mut builder = self.client.get(&req.url).query(&req.query);
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16()));
        }
        Ok(resp.text().await?)
    }
}

// --- Test helper ---

/// Serves canned bodies (or errors) by URL prefix and records every request.
/// Unrouted URLs answer with HTTP 404.
pub struct StaticFetcher {
    routes: Vec<(String, Result<String, FetchError>)>,
    pub calls: Mutex<Vec<PageRequest>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_body(mut self, url_prefix: &str, body: &str) -> Self {
        self.routes
            .push((url_prefix.to_string(), Ok(body.to_string())));
        self
    }

    pub fn with_error(mut self, url_prefix: &str, err: FetchError) -> Self {
        self.routes.push((url_prefix.to_string(), Err(err)));
        self
    }

    /// Number of recorded requests whose URL starts with `url_prefix`.
    pub fn calls_to(&self, url_prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|r| r.url.starts_with(url_prefix))
            .count()
    }
}

impl Default for StaticFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn get(&self, req: &PageRequest) -> Result<String, FetchError> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(req.clone());
        self.routes
            .iter()
            .find(|(prefix, _)| req.url.starts_with(prefix.as_str()))
            .map(|(_, res)| res.clone())
            .unwrap_or(Err(FetchError::Status(404)))
    }
}
