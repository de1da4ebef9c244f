//! User container readiness probing.
//!
//! # Responsibilities
//! - Poll the container's local health endpoint until it answers 200
//! - Bound every attempt and, optionally, the whole probe
//! - Report the failure class of the last attempt when giving up
//!
//! # Design Decisions
//! - A zero timeout means retry forever (initial bring-up)
//! - An attempt cut short by the overall deadline yields `TimedOut`, never
//!   the error of an earlier attempt
//! - Polling stops early once the remaining budget cannot fit another
//!   interval plus a minimal attempt

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time::{self, Instant};

use crate::health::readiness::{ReadinessReader, ReadinessState};
use crate::observability::metrics;

/// Path polled when none is configured.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Pause between attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Upper bound on a single attempt.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

const PROBE_USER_AGENT: &str = "queue-sidecar-probe";

/// Failure of a readiness probe.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// The container is not accepting connections.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The container answered with something other than 200.
    #[error("probe returned not ready")]
    NotReady,
    /// An attempt did not finish within its budget.
    #[error("probe timed out")]
    TimedOut,
}

/// Polls one local health endpoint.
#[derive(Debug, Clone)]
pub struct HealthProber {
    uri: String,
    attempt_timeout: Duration,
    client: Client<HttpConnector, Body>,
}

impl HealthProber {
    pub fn new(port: u16, path: &str) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            uri: format!("http://127.0.0.1:{}{}", port, path),
            attempt_timeout: ATTEMPT_TIMEOUT,
            client,
        }
    }

    /// Override the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Probe until the endpoint answers 200 or `timeout` elapses.
    /// A zero `timeout` retries indefinitely.
    pub async fn probe(&self, timeout: Duration) -> Result<(), ProbeError> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let (budget, cut_by_deadline) = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining <= self.attempt_timeout {
                        (remaining, true)
                    } else {
                        (self.attempt_timeout, false)
                    }
                }
                None => (self.attempt_timeout, false),
            };

            let error = match time::timeout(budget, self.attempt()).await {
                Ok(Ok(())) => {
                    tracing::debug!(uri = %self.uri, attempts, "Probe succeeded");
                    return Ok(());
                }
                Ok(Err(e)) => e,
                Err(_) if cut_by_deadline => {
                    tracing::warn!(uri = %self.uri, attempts, "Probe attempt exceeded deadline");
                    return Err(ProbeError::TimedOut);
                }
                Err(_) => ProbeError::TimedOut,
            };

            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining < POLL_INTERVAL * 2 {
                    tracing::warn!(uri = %self.uri, attempts, error = %error, "Probe deadline exceeded");
                    return Err(error);
                }
            }

            tracing::trace!(uri = %self.uri, attempts, error = %error, "Probe attempt failed, retrying");
            time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn attempt(&self) -> Result<(), ProbeError> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(&self.uri)
            .header(header::USER_AGENT, PROBE_USER_AGENT)
            .body(Body::empty())
            .map_err(|e| ProbeError::ConnectionFailed(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ProbeError::ConnectionFailed(e.to_string()))?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(ProbeError::NotReady)
        }
    }
}

/// Probe `127.0.0.1:<port>` on the default health path.
///
/// `timeout_secs` of zero retries until the container answers.
pub async fn probe_health(port: u16, timeout_secs: u64) -> Result<(), ProbeError> {
    HealthProber::new(port, DEFAULT_HEALTH_PATH)
        .probe(Duration::from_secs(timeout_secs))
        .await
}

/// Drives a [`HealthProber`] and owns the readiness cell it flips.
pub struct ReadinessProber {
    prober: HealthProber,
    timeout: Duration,
    state: ReadinessState,
}

impl ReadinessProber {
    pub fn new(prober: HealthProber, timeout: Duration) -> Self {
        Self {
            prober,
            timeout,
            state: ReadinessState::new(),
        }
    }

    /// Read-only handle for the request handler and admin API.
    pub fn reader(&self) -> ReadinessReader {
        self.state.reader()
    }

    /// Probe once and mark the container ready on success.
    pub async fn run(self) -> Result<(), ProbeError> {
        tracing::info!(timeout = ?self.timeout, "Waiting for user container to become ready");
        match self.prober.probe(self.timeout).await {
            Ok(()) => {
                self.state.mark_ready();
                metrics::record_container_ready(true);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "User container failed readiness probe");
                metrics::record_container_ready(false);
                Err(e)
            }
        }
    }
}
