//! Probe module for reachability monitoring.
//!
//! A [`Prober`] walks an ordered list of public endpoints and reports the
//! first one that answers. When none answers, the router's diagnostic state
//! is captured instead.

mod diagnostics;
mod ping;
mod weather;

pub use diagnostics::*;
pub use ping::*;
pub use weather::*;

use crate::db::Outcome;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// A probe target: an address plus a human label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: IpAddr,
    pub label: String,
}

impl Endpoint {
    pub fn new(address: IpAddr, label: &str) -> Self {
        Self {
            address,
            label: label.to_string(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.address)
    }
}

/// A single reachability attempt against one endpoint.
#[async_trait]
pub trait Reachability: Send + Sync {
    /// Returns the round-trip time when the endpoint answers within `timeout`.
    async fn reachable(&self, endpoint: &Endpoint, timeout: Duration) -> Result<Duration, ProbeError>;
}

/// Outcome of one [`Prober::check`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    /// Instant the check started
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
}

impl ProbeResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, Outcome::Reachable { .. })
    }
}

/// Checks internet reachability against an ordered endpoint list.
pub struct Prober {
    endpoints: Vec<Endpoint>,
    timeout: Duration,
    attempts: u32,
    reachability: Arc<dyn Reachability>,
    diagnostics: Arc<dyn DiagnosticsFetcher>,
}

impl Prober {
    pub fn new(
        endpoints: Vec<Endpoint>,
        timeout: Duration,
        attempts: u32,
        reachability: Arc<dyn Reachability>,
        diagnostics: Arc<dyn DiagnosticsFetcher>,
    ) -> Self {
        Self {
            endpoints,
            timeout,
            attempts: attempts.max(1),
            reachability,
            diagnostics,
        }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Try every endpoint in configured order and stop at the first answer.
    ///
    /// The reported latency belongs to the first responding endpoint, not the
    /// fastest one. Only when every endpoint fails are router diagnostics
    /// fetched.
    pub async fn check(&self) -> ProbeResult {
        let timestamp = Utc::now();

        for endpoint in &self.endpoints {
            if let Some(latency) = self.try_endpoint(endpoint).await {
                return ProbeResult {
                    timestamp,
                    outcome: Outcome::Reachable {
                        dns_ip: endpoint.address,
                        dns_latency: latency_ms(latency),
                    },
                };
            }
        }

        let router_state = self.diagnostics.fetch_router_state().await;
        ProbeResult {
            timestamp,
            outcome: Outcome::Unreachable { router_state },
        }
    }

    async fn try_endpoint(&self, endpoint: &Endpoint) -> Option<Duration> {
        for attempt in 1..=self.attempts {
            match self.reachability.reachable(endpoint, self.timeout).await {
                Ok(latency) => return Some(latency),
                Err(e) => {
                    tracing::warn!(
                        "{} is unreachable (attempt {}/{}): {}",
                        endpoint,
                        attempt,
                        self.attempts,
                        e
                    );
                }
            }
        }
        None
    }
}

/// Round a latency to whole milliseconds.
fn latency_ms(latency: Duration) -> u32 {
    let ms = (latency.as_micros() + 500) / 1000;
    u32::try_from(ms).unwrap_or(u32::MAX)
}
