//! Service records and health-check results.

use chrono::{DateTime, Utc};
use flotilla_core::ServiceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Health status of a registered instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Not probed yet.
    #[default]
    Unknown,
    /// Last probe succeeded.
    Healthy,
    /// Last probe failed.
    Unhealthy,
}

impl ServiceStatus {
    /// Returns the status as a lowercase string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a service submits when it registers itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    /// Unique instance id.
    pub id: ServiceId,
    /// Logical service name, shared by all instances of the service.
    pub name: String,
    /// Version of the running build.
    pub version: String,
    /// Base URL the instance serves on.
    pub base_url: String,
    /// Health endpoint; defaults to `<base_url>/health`.
    #[serde(default)]
    pub health_check_url: Option<String>,
    /// Free-form metadata (region, capabilities, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ServiceRegistration {
    /// Creates a registration with no metadata and the default health endpoint.
    #[must_use]
    pub fn new(
        id: ServiceId,
        name: impl Into<String>,
        version: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            version: version.into(),
            base_url: base_url.into(),
            health_check_url: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Overrides the health endpoint.
    #[must_use]
    pub fn with_health_check_url(mut self, url: impl Into<String>) -> Self {
        self.health_check_url = Some(url.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A registered service instance as the registry sees it.
///
/// Everything except `status` and `last_health_check` is fixed at
/// registration. Changing it takes an unregister followed by a register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: ServiceId,
    pub name: String,
    pub version: String,
    pub base_url: String,
    pub health_check_url: Option<String>,
    pub status: ServiceStatus,
    pub metadata: BTreeMap<String, String>,
    pub registered_at: DateTime<Utc>,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl ServiceRecord {
    /// Creates the initial record for a registration.
    #[must_use]
    pub fn from_registration(registration: ServiceRegistration, registered_at: DateTime<Utc>) -> Self {
        Self {
            id: registration.id,
            name: registration.name,
            version: registration.version,
            base_url: registration.base_url,
            health_check_url: registration.health_check_url,
            status: ServiceStatus::Unknown,
            metadata: registration.metadata,
            registered_at,
            last_health_check: None,
        }
    }

    /// The URL the health probe targets.
    #[must_use]
    pub fn health_endpoint(&self) -> String {
        match &self.health_check_url {
            Some(url) => url.clone(),
            None => format!("{}/health", self.base_url.trim_end_matches('/')),
        }
    }

    /// Returns true if the last probe succeeded.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }

    /// Folds a probe result into the record, returning the previous status.
    pub(crate) fn apply_health(&mut self, result: &HealthCheckResult) -> ServiceStatus {
        let previous = self.status;
        self.status = if result.healthy {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::Unhealthy
        };
        self.last_health_check = Some(result.timestamp);
        previous
    }
}

/// Why a probe did not count as healthy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeFailure {
    /// No response within the probe timeout.
    Timeout { after_ms: u64 },
    /// Connection refused, DNS failure, TLS error and the like.
    Unreachable { message: String },
    /// The endpoint answered with a non-2xx status.
    UnexpectedStatus { status: u16 },
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { after_ms } => write!(f, "health check timed out after {after_ms}ms"),
            Self::Unreachable { message } => write!(f, "health endpoint unreachable: {message}"),
            Self::UnexpectedStatus { status } => write!(f, "health endpoint returned HTTP {status}"),
        }
    }
}

/// Outcome of one health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub latency_ms: u64,
    pub error: Option<ProbeFailure>,
    pub timestamp: DateTime<Utc>,
}

impl HealthCheckResult {
    /// A successful probe.
    #[must_use]
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            healthy: true,
            latency_ms,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// A failed probe.
    #[must_use]
    pub fn unhealthy(failure: ProbeFailure, latency_ms: u64) -> Self {
        Self {
            healthy: false,
            latency_ms,
            error: Some(failure),
            timestamp: Utc::now(),
        }
    }
}

/// Aggregate health counts, derived on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStatistics {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
}

impl FromIterator<ServiceStatus> for RegistryStatistics {
    fn from_iter<I: IntoIterator<Item = ServiceStatus>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), |mut stats, status| {
            stats.total += 1;
            match status {
                ServiceStatus::Healthy => stats.healthy += 1,
                ServiceStatus::Unhealthy => stats.unhealthy += 1,
                ServiceStatus::Unknown => stats.unknown += 1,
            }
            stats
        })
    }
}
