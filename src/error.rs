use thiserror::Error;

/// Coarse failure classes used for structured logging and breaker weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    Timeout,
    RateLimit,
    Auth,
    Http,
    Parse,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Network => "network",
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimit => "rate_limit",
            FailureKind::Auth => "auth",
            FailureKind::Http => "http",
            FailureKind::Parse => "parse",
        }
    }
}

/// Operation-level failure of a single provider call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("rate limited by provider (HTTP 429)")]
    RateLimited,
    #[error("authentication rejected (HTTP {0})")]
    Auth(u16),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("could not parse provider response: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Network(_) => FailureKind::Network,
            FetchError::Timeout(_) => FailureKind::Timeout,
            FetchError::RateLimited => FailureKind::RateLimit,
            FetchError::Auth(_) => FailureKind::Auth,
            FetchError::Status(_) => FailureKind::Http,
            FetchError::Parse(_) => FailureKind::Parse,
        }
    }

    /// Map a non-success HTTP status into the taxonomy.
    pub fn from_status(code: u16) -> Self {
        match code {
            429 => FetchError::RateLimited,
            401 | 403 => FetchError::Auth(code),
            other => FetchError::Status(other),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return FetchError::Timeout(0);
        }
        if let Some(status) = e.status() {
            return FetchError::from_status(status.as_u16());
        }
        if e.is_decode() {
            return FetchError::Parse(e.to_string());
        }
        FetchError::Network(e.to_string())
    }
}

/// Outcome of a call routed through the resilience executor.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecError {
    #[error("circuit open for source '{source_name}'")]
    CircuitOpen { source_name: String },
    #[error("all {attempts} attempt(s) failed: {last}")]
    Exhausted { attempts: u32, last: FetchError },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("listing rejected: {0}")]
    Invalid(String),
}

/// Orchestrator initialization failures; the only errors a sync call returns.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("no source adapters are configured")]
    NoAdapters,
    #[error("no search queries were supplied")]
    NoQueries,
}
