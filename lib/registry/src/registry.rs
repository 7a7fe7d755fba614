//! The service registry.
//!
//! The table is a `DashMap`, so writers touching different ids never contend
//! and writers touching the same id are serialized by its shard lock. Reads
//! hand out cloned snapshots.

use crate::error::RegistryError;
use crate::event::{EventBus, RegistryEvent, Subscription, SubscriptionId};
use crate::probe::{HealthProbe, HttpHealthProbe};
use crate::record::{
    HealthCheckResult, RegistryStatistics, ServiceRecord, ServiceRegistration, ServiceStatus,
};
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use dashmap::mapref::entry::Entry;
use flotilla_core::ServiceId;
use regex::Regex;
use rootcause::prelude::Report;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default interval between health sweeps.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Default upper bound on a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Interval between health sweeps.
    pub health_check_interval: Duration,
    /// Upper bound on a single probe.
    pub probe_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

struct Inner {
    services: DashMap<ServiceId, ServiceRecord>,
    in_flight: DashSet<ServiceId>,
    probe: Arc<dyn HealthProbe>,
    events: EventBus,
    config: RegistryConfig,
}

/// Catalog of service instances and their health.
///
/// Cloning is cheap and every clone shares the same table.
#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.inner.services.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl ServiceRegistry {
    /// Creates a registry probing over HTTP.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_probe(config, Arc::new(HttpHealthProbe::new()))
    }

    /// Creates a registry with a custom probe.
    #[must_use]
    pub fn with_probe(config: RegistryConfig, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            inner: Arc::new(Inner {
                services: DashMap::new(),
                in_flight: DashSet::new(),
                probe,
                events: EventBus::default(),
                config,
            }),
        }
    }

    /// Returns the registry configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Registers a service instance with status `unknown`.
    ///
    /// A first health probe is spawned in the background when a tokio
    /// runtime is available; the call does not wait for it.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRegistered` if the id is taken.
    #[instrument(skip(self, registration), fields(id = %registration.id, name = %registration.name))]
    pub fn register(
        &self,
        registration: ServiceRegistration,
    ) -> Result<ServiceRecord, Report<RegistryError>> {
        let record = match self.inner.services.entry(registration.id.clone()) {
            Entry::Occupied(_) => {
                return Err(RegistryError::AlreadyRegistered {
                    id: registration.id,
                }
                .into());
            }
            Entry::Vacant(slot) => {
                let record = ServiceRecord::from_registration(registration, Utc::now());
                slot.insert(record.clone());
                record
            }
        };

        info!(base_url = %record.base_url, version = %record.version, "service registered");
        self.inner.events.publish(&RegistryEvent::Registered {
            record: record.clone(),
        });
        self.spawn_probe(record.id.clone());

        Ok(record)
    }

    /// Probes `id` in the background unless a probe for it is already
    /// running. Returns whether a probe was started.
    ///
    /// Registration and the sweep share the in-flight set, so one instance
    /// never has two probes outstanding.
    pub(crate) fn spawn_probe(&self, id: ServiceId) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(service_id = %id, "no runtime; probe deferred to the sweep");
            return false;
        };
        if !self.inner.in_flight.insert(id.clone()) {
            return false;
        }

        let registry = self.clone();
        handle.spawn(async move {
            // NotFound only means the instance left before the probe ran.
            if let Err(report) = registry.perform_health_check(&id).await {
                debug!(service_id = %id, error = %report, "probe skipped");
            }
            registry.inner.in_flight.remove(&id);
        });
        true
    }

    #[cfg(test)]
    pub(crate) fn probes_in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Removes a service instance.
    ///
    /// Returns the removed record, or `None` (and logs a warning) if the id
    /// was not registered.
    #[instrument(skip(self), fields(id = %id))]
    pub fn unregister(&self, id: &ServiceId) -> Option<ServiceRecord> {
        match self.inner.services.remove(id) {
            Some((_, record)) => {
                info!(name = %record.name, "service unregistered");
                self.inner.events.publish(&RegistryEvent::Unregistered {
                    record: record.clone(),
                });
                Some(record)
            }
            None => {
                warn!("unregister requested for unknown service");
                None
            }
        }
    }

    /// Returns a snapshot of one record.
    #[must_use]
    pub fn get(&self, id: &ServiceId) -> Option<ServiceRecord> {
        self.inner.services.get(id).map(|entry| entry.value().clone())
    }

    /// Returns the earliest-registered instance with exactly this name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<ServiceRecord> {
        self.list().into_iter().find(|record| record.name == name)
    }

    /// Returns every record in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<ServiceRecord> {
        let mut records: Vec<ServiceRecord> = self
            .inner
            .services
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }

    /// Returns the records whose last probe succeeded.
    #[must_use]
    pub fn list_healthy(&self) -> Vec<ServiceRecord> {
        self.list()
            .into_iter()
            .filter(ServiceRecord::is_healthy)
            .collect()
    }

    /// Returns every record whose name matches `pattern`, healthy or not.
    ///
    /// The pattern is an unanchored regular expression.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPattern` if `pattern` does not compile.
    pub fn discover(&self, pattern: &str) -> Result<Vec<ServiceRecord>, Report<RegistryError>> {
        let regex = Regex::new(pattern).map_err(|e| RegistryError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(self
            .list()
            .into_iter()
            .filter(|record| regex.is_match(&record.name))
            .collect())
    }

    /// Probes one instance now and records the outcome.
    ///
    /// Probe failures come back as an unhealthy result, never as an error.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is not registered.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn perform_health_check(
        &self,
        id: &ServiceId,
    ) -> Result<HealthCheckResult, Report<RegistryError>> {
        let endpoint = self
            .get(id)
            .map(|record| record.health_endpoint())
            .ok_or_else(|| RegistryError::NotFound { id: id.clone() })?;

        let result = self
            .inner
            .probe
            .probe(&endpoint, self.inner.config.probe_timeout)
            .await;
        debug!(
            healthy = result.healthy,
            latency_ms = result.latency_ms,
            "health probe finished"
        );

        self.record_health(id, &result);
        Ok(result)
    }

    /// Applies a probe result. Results for ids removed mid-probe are dropped.
    fn record_health(&self, id: &ServiceId, result: &HealthCheckResult) {
        let transition = match self.inner.services.get_mut(id) {
            Some(mut entry) => {
                let previous = entry.apply_health(result);
                (previous, entry.status)
            }
            None => {
                debug!(service_id = %id, "discarding probe result for unregistered service");
                return;
            }
        };

        self.inner.events.publish(&RegistryEvent::HealthChecked {
            id: id.clone(),
            result: result.clone(),
        });

        let (from, to) = transition;
        if from == to {
            return;
        }
        match (to, &result.error) {
            (ServiceStatus::Unhealthy, Some(failure)) => {
                warn!(service_id = %id, %from, error = %failure, "service became unhealthy");
            }
            _ => info!(service_id = %id, %from, %to, "service status changed"),
        }
        self.inner
            .events
            .publish(&RegistryEvent::StatusChanged { id: id.clone(), from, to });
    }

    /// Counts instances by status.
    #[must_use]
    pub fn statistics(&self) -> RegistryStatistics {
        self.inner
            .services
            .iter()
            .map(|entry| entry.value().status)
            .collect()
    }

    /// Ids of every registered instance.
    pub(crate) fn ids(&self) -> Vec<ServiceId> {
        self.inner
            .services
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Subscribes to registry events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.inner.events.subscribe()
    }

    /// Cancels a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }
}
