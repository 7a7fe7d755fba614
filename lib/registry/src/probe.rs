//! Health probes.

use crate::record::{HealthCheckResult, ProbeFailure};
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Checks whether a health endpoint is live.
///
/// Implementations must return within `timeout` and must never fail: every
/// transport problem is reported as an unhealthy result.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probes `url`, giving up after `timeout`.
    async fn probe(&self, url: &str, timeout: Duration) -> HealthCheckResult;
}

/// Probe issuing `GET <url>`; any 2xx status is healthy.
#[derive(Debug, Clone, Default)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    /// Creates a probe with a default HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a probe sharing an existing HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn timeout_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, url: &str, timeout: Duration) -> HealthCheckResult {
        let started = Instant::now();
        let request = self.client.get(url).timeout(timeout).send();

        // reqwest's timeout covers the request, the outer one bounds DNS and
        // connection setup stalls as well.
        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(response)) if response.status().is_success() => {
                HealthCheckResult::healthy(elapsed_ms(started))
            }
            Ok(Ok(response)) => HealthCheckResult::unhealthy(
                ProbeFailure::UnexpectedStatus {
                    status: response.status().as_u16(),
                },
                elapsed_ms(started),
            ),
            Ok(Err(e)) if e.is_timeout() => HealthCheckResult::unhealthy(
                ProbeFailure::Timeout {
                    after_ms: timeout_ms(timeout),
                },
                elapsed_ms(started),
            ),
            Ok(Err(e)) => HealthCheckResult::unhealthy(
                ProbeFailure::Unreachable {
                    message: e.to_string(),
                },
                elapsed_ms(started),
            ),
            Err(_) => HealthCheckResult::unhealthy(
                ProbeFailure::Timeout {
                    after_ms: timeout_ms(timeout),
                },
                elapsed_ms(started),
            ),
        }
    }
}
