//! Retry-with-backoff plus a per-source circuit breaker.
//!
//! Every outbound adapter call goes through [`ResilienceExecutor::execute`]:
//! - Closed: up to `max_attempts` tries, delay doubling between them.
//! - Open: calls short-circuit until the cool-down elapses.
//! - HalfOpen: exactly one single-attempt probe decides whether the circuit
//!   closes again or re-opens for another cool-down.
//!
//! Circuit state is created lazily on the first failure of a source and is
//! owned by the executor instance.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ExecError, FailureKind, FetchError};

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_secs() -> u64 {
    300
}
fn default_call_timeout_secs() -> u64 {
    35
}
fn default_rate_limit_weight() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResilienceConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Budget for one attempt, covering the adapter's whole strategy chain.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// How many failures a single rate-limit response counts as.
    #[serde(default = "default_rate_limit_weight")]
    pub rate_limit_weight: u32,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            rate_limit_weight: default_rate_limit_weight(),
        }
    }
}

impl ResilienceConfig {
    fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
    fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
    fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Open { until: Instant },
    /// A single probe is in flight; everything else is rejected. A probe that never
    /// reported back (dropped future) is replaced after another cool-down.
    HalfOpen { since: Instant },
}

#[derive(Debug, Clone)]
struct CircuitState {
    failures: u32,
    phase: Phase,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            failures: 0,
            phase: Phase::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealth {
    pub status: HealthStatus,
    pub failures: u32,
    pub circuit_open: bool,
}

impl SourceHealth {
    /// Health of a source that has never failed.
    pub fn up() -> Self {
        Self {
            status: HealthStatus::Up,
            failures: 0,
            circuit_open: false,
        }
    }
}

pub struct ResilienceExecutor {
    cfg: ResilienceConfig,
    circuits: Mutex<HashMap<String, CircuitState>>,
}

impl ResilienceExecutor {
    pub fn new(cfg: ResilienceConfig) -> Self {
        Self {
            cfg,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Run `op` for `source` under the retry and circuit-breaker policy.
    ///
    /// `op` is invoked once per attempt; each attempt is bounded by the call timeout.
    pub async fn execute<T, F, Fut>(&self, source: &str, mut op: F) -> Result<T, ExecError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let admission = self.admit(source);
        if admission == Admission::Rejected {
            counter!("resilience_short_circuits_total", "source" => source.to_string())
                .increment(1);
            debug!(target: "resilience", source, "circuit open, skipping call");
            return Err(ExecError::CircuitOpen {
                source_name: source.to_string(),
            });
        }

        let attempts = match admission {
            Admission::Probe => {
                info!(target: "resilience", source, "cool-down elapsed, sending probe");
                1
            }
            _ => self.cfg.max_attempts.max(1),
        };

        let timeout = self.cfg.call_timeout();
        let mut made = 0u32;
        let mut last = FetchError::Network("no attempt made".to_string());

        for attempt in 1..=attempts {
            made = attempt;
            let outcome = match tokio::time::timeout(timeout, op()).await {
                Ok(res) => res,
                Err(_) => Err(FetchError::Timeout(timeout.as_millis() as u64)),
            };

            match outcome {
                Ok(value) => {
                    self.record_success(source);
                    return Ok(value);
                }
                Err(err) => {
                    log_failure(source, attempt, attempts, &err);
                    let opened = self.record_failure(source, &err);
                    last = err;
                    if opened {
                        break;
                    }
                    if attempt < attempts {
                        let delay = self.cfg.base_delay() * 2u32.saturating_pow(attempt - 1);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(ExecError::Exhausted {
            attempts: made,
            last,
        })
    }

    fn admit(&self, source: &str) -> Admission {
        let mut circuits = self.circuits.lock().unwrap_or_else(|p| p.into_inner());
        let Some(state) = circuits.get_mut(source) else {
            return Admission::Normal;
        };
        match state.phase {
            Phase::Closed => Admission::Normal,
            Phase::Open { until } => {
                let now = Instant::now();
                if now >= until {
                    state.phase = Phase::HalfOpen { since: now };
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            Phase::HalfOpen { since } => {
                let now = Instant::now();
                if now >= since + self.cfg.cooldown() {
                    state.phase = Phase::HalfOpen { since: now };
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    fn record_success(&self, source: &str) {
        let mut circuits = self.circuits.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(state) = circuits.get_mut(source) {
            if state.phase != Phase::Closed {
                info!(target: "resilience", source, "circuit closed");
            }
            *state = CircuitState::default();
        }
    }

    /// Returns true when the circuit is open after recording this failure.
    fn record_failure(&self, source: &str, err: &FetchError) -> bool {
        let weight = match err.kind() {
            FailureKind::RateLimit => self.cfg.rate_limit_weight.max(1),
            _ => 1,
        };
        counter!(
            "resilience_failures_total",
            "source" => source.to_string(),
            "kind" => err.kind().as_str()
        )
        .increment(1);

        let mut circuits = self.circuits.lock().unwrap_or_else(|p| p.into_inner());
        let state = circuits.entry(source.to_string()).or_default();
        state.failures = state.failures.saturating_add(weight);

        let probe_failed = matches!(state.phase, Phase::HalfOpen { .. });
        if probe_failed || state.failures >= self.cfg.failure_threshold {
            state.phase = Phase::Open {
                until: Instant::now() + self.cfg.cooldown(),
            };
            counter!("resilience_circuit_opened_total", "source" => source.to_string())
                .increment(1);
            warn!(
                target: "resilience",
                source,
                failures = state.failures,
                kind = err.kind().as_str(),
                cooldown_secs = self.cfg.cooldown_secs,
                probe_failed,
                "circuit opened"
            );
            return true;
        }
        false
    }

    /// Clear a source's circuit state entirely.
    pub fn reset(&self, source: &str) {
        let mut circuits = self.circuits.lock().unwrap_or_else(|p| p.into_inner());
        circuits.remove(source);
    }

    /// Per-source health for every source that has failed at least once.
    pub fn health(&self) -> BTreeMap<String, SourceHealth> {
        let now = Instant::now();
        let circuits = self.circuits.lock().unwrap_or_else(|p| p.into_inner());
        circuits
            .iter()
            .map(|(name, st)| {
                let circuit_open = matches!(st.phase, Phase::Open { until } if now < until);
                let status = match st.phase {
                    Phase::Closed => HealthStatus::Up,
                    _ => HealthStatus::Down,
                };
                (
                    name.clone(),
                    SourceHealth {
                        status,
                        failures: st.failures,
                        circuit_open,
                    },
                )
            })
            .collect()
    }
}

impl Default for ResilienceExecutor {
    fn default() -> Self {
        Self::new(ResilienceConfig::default())
    }
}

fn log_failure(source: &str, attempt: u32, attempts: u32, err: &FetchError) {
    let kind = err.kind().as_str();
    match err.kind() {
        FailureKind::Auth => warn!(
            target: "resilience",
            source, attempt, attempts, kind, error = %err,
            "auth failure; retry unlikely to help"
        ),
        FailureKind::RateLimit => warn!(
            target: "resilience",
            source, attempt, attempts, kind, error = %err,
            "rate limited by provider"
        ),
        _ => warn!(
            target: "resilience",
            source, attempt, attempts, kind, error = %err,
            "provider call failed"
        ),
    }
}
