//! Resolving a service name to one instance.

use crate::error::{DiscoveryError, RegistryError};
use crate::record::ServiceRecord;
use crate::registry::ServiceRegistry;
use dashmap::DashMap;
use flotilla_core::ServiceId;
use rand::Rng;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Policy for picking one instance among candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Rotate through candidates with a cursor per service name.
    #[default]
    RoundRobin,
    /// Uniform random pick.
    Random,
    /// Fewest open connections; ties go to the earliest registered.
    LeastConnections,
    /// Most recently checked first; never-checked instances last.
    HealthBased,
}

impl Strategy {
    /// Returns the strategy's wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::Random => "random",
            Self::LeastConnections => "least-connections",
            Self::HealthBased => "health-based",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            "least-connections" => Ok(Self::LeastConnections),
            "health-based" => Ok(Self::HealthBased),
            other => Err(DiscoveryError::UnknownStrategy {
                name: other.to_string(),
            }),
        }
    }
}

/// Most round-robin cursors kept at once. Past this the table is reset,
/// which only restarts rotation.
const MAX_ROUND_ROBIN_CURSORS: usize = 1024;

/// Round-robin cursors and open-connection counts.
///
/// Lives as long as the [`Discovery`] that owns it; nothing is persisted.
/// Connection counts are dropped when their instance is unregistered
/// through [`Discovery::unregister`].
#[derive(Debug, Default)]
pub struct RoutingCounters {
    cursors: DashMap<String, AtomicUsize>,
    connections: DashMap<ServiceId, AtomicU64>,
}

impl RoutingCounters {
    /// Returns the cursor for `name` and advances it.
    fn next_cursor(&self, name: &str) -> usize {
        if let Some(cursor) = self.cursors.get(name) {
            return cursor.fetch_add(1, Ordering::Relaxed);
        }
        if self.cursors.len() >= MAX_ROUND_ROBIN_CURSORS {
            debug!(cursors = self.cursors.len(), "round-robin cursor table full, resetting");
            self.cursors.clear();
        }
        self.cursors
            .entry(name.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed)
    }

    fn increment(&self, id: &ServiceId) -> u64 {
        self.connections
            .entry(id.clone())
            .or_default()
            .fetch_add(1, Ordering::Relaxed)
            + 1
    }

    fn decrement(&self, id: &ServiceId) -> u64 {
        let Some(counter) = self.connections.get(id) else {
            return 0;
        };
        let previous = counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    fn connections(&self, id: &ServiceId) -> u64 {
        self.connections
            .get(id)
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    fn forget(&self, id: &ServiceId) {
        self.connections.remove(id);
    }
}

/// Picks one instance of a named service per request.
#[derive(Debug, Clone)]
pub struct Discovery {
    registry: ServiceRegistry,
    counters: Arc<RoutingCounters>,
}

impl Discovery {
    #[must_use]
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            registry,
            counters: Arc::new(RoutingCounters::default()),
        }
    }

    /// Selects one instance whose name matches `name`.
    ///
    /// Healthy instances are preferred. When none are healthy the choice is
    /// made among all matches instead, so a fleet whose health checks are
    /// failing still routes somewhere.
    ///
    /// # Errors
    ///
    /// `NotFound` if nothing matches, `InvalidPattern` if `name` is not a
    /// valid pattern.
    pub fn discover(
        &self,
        name: &str,
        strategy: Strategy,
    ) -> Result<ServiceRecord, Report<DiscoveryError>> {
        let matches = self.registry.discover(name).map_err(|report| {
            match report.current_context() {
                RegistryError::InvalidPattern { pattern, reason } => {
                    DiscoveryError::InvalidPattern {
                        pattern: pattern.clone(),
                        reason: reason.clone(),
                    }
                }
                _ => DiscoveryError::NotFound {
                    name: name.to_string(),
                },
            }
        })?;

        let healthy: Vec<ServiceRecord> = matches
            .iter()
            .filter(|record| record.is_healthy())
            .cloned()
            .collect();
        let candidates = if healthy.is_empty() {
            if !matches.is_empty() {
                warn!(
                    service = name,
                    instances = matches.len(),
                    "no healthy instances, falling back to all matches"
                );
            }
            matches
        } else {
            healthy
        };

        let selected = self
            .select(name, &candidates, strategy)
            .ok_or_else(|| DiscoveryError::NotFound {
                name: name.to_string(),
            })?;
        debug!(service = name, %strategy, selected = %selected.id, "instance selected");
        Ok(selected)
    }

    /// Applies `strategy` to `candidates`. Returns `None` only when
    /// `candidates` is empty.
    #[must_use]
    pub fn select(
        &self,
        name: &str,
        candidates: &[ServiceRecord],
        strategy: Strategy,
    ) -> Option<ServiceRecord> {
        if candidates.is_empty() {
            return None;
        }

        let picked = match strategy {
            Strategy::RoundRobin => {
                let index = self.counters.next_cursor(name) % candidates.len();
                &candidates[index]
            }
            Strategy::Random => {
                let index = rand::thread_rng().gen_range(0..candidates.len());
                &candidates[index]
            }
            Strategy::LeastConnections => candidates
                .iter()
                .min_by_key(|record| self.counters.connections(&record.id))?,
            Strategy::HealthBased => candidates
                .iter()
                .min_by_key(|record| Reverse(record.last_health_check))?,
        };
        Some(picked.clone())
    }

    /// Records an outbound call starting. Returns the new count.
    pub fn increment_connections(&self, id: &ServiceId) -> u64 {
        self.counters.increment(id)
    }

    /// Records an outbound call ending. Never drops below zero.
    pub fn decrement_connections(&self, id: &ServiceId) -> u64 {
        self.counters.decrement(id)
    }

    /// Open connections to `id` (0 if untracked).
    #[must_use]
    pub fn connections(&self, id: &ServiceId) -> u64 {
        self.counters.connections(id)
    }

    /// Unregisters `id` and drops its connection count.
    pub fn unregister(&self, id: &ServiceId) -> Option<ServiceRecord> {
        self.counters.forget(id);
        self.registry.unregister(id)
    }

    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::scripted::ScriptedProbe;
    use crate::record::ServiceRegistration;
    use crate::registry::RegistryConfig;
    use chrono::{TimeDelta, Utc};
    use std::collections::HashMap;

    fn id(raw: &str) -> ServiceId {
        raw.parse().expect("valid id")
    }

    struct Fleet {
        discovery: Discovery,
        probe: Arc<ScriptedProbe>,
    }

    impl Fleet {
        fn new() -> Self {
            let probe = Arc::new(ScriptedProbe::default());
            let registry = ServiceRegistry::with_probe(RegistryConfig::default(), probe.clone());
            Self {
                discovery: Discovery::new(registry),
                probe,
            }
        }

        fn add(&self, raw_id: &str, name: &str) -> ServiceRecord {
            self.discovery
                .registry()
                .register(ServiceRegistration::new(
                    id(raw_id),
                    name,
                    "1.0.0",
                    format!("http://{raw_id}"),
                ))
                .unwrap()
        }

        async fn check(&self, record: &ServiceRecord, healthy: bool) {
            self.probe.set(&record.health_endpoint(), healthy);
            self.discovery
                .registry()
                .perform_health_check(&record.id)
                .await
                .unwrap();
        }
    }

    #[test]
    fn strategy_names_round_trip() {
        for strategy in [
            Strategy::RoundRobin,
            Strategy::Random,
            Strategy::LeastConnections,
            Strategy::HealthBased,
        ] {
            assert_eq!(strategy.as_str().parse::<Strategy>().unwrap(), strategy);
        }
        assert_eq!(Strategy::default(), Strategy::RoundRobin);
        assert!(matches!(
            "fastest".parse::<Strategy>(),
            Err(DiscoveryError::UnknownStrategy { .. })
        ));
        assert_eq!(
            serde_json::to_string(&Strategy::LeastConnections).unwrap(),
            "\"least-connections\""
        );
    }

    #[tokio::test]
    async fn round_robin_spreads_evenly() {
        let fleet = Fleet::new();
        let instances = [
            fleet.add("rag-1", "rag"),
            fleet.add("rag-2", "rag"),
            fleet.add("rag-3", "rag"),
        ];
        for record in &instances {
            fleet.check(record, true).await;
        }

        let mut hits: HashMap<ServiceId, usize> = HashMap::new();
        for _ in 0..30 {
            let picked = fleet.discovery.discover("rag", Strategy::RoundRobin).unwrap();
            *hits.entry(picked.id).or_default() += 1;
        }

        assert_eq!(hits.len(), 3);
        assert!(hits.values().all(|&count| count == 10));
    }

    #[tokio::test]
    async fn only_healthy_instances_are_chosen_when_available() {
        let fleet = Fleet::new();
        let up = fleet.add("vs-1", "vector-store");
        let down = fleet.add("vs-2", "vector-store");
        fleet.check(&up, true).await;
        fleet.check(&down, false).await;

        for _ in 0..10 {
            let picked = fleet.discovery.discover("vector-store", Strategy::Random).unwrap();
            assert_eq!(picked.id, up.id);
        }
    }

    #[tokio::test]
    async fn falls_back_to_unhealthy_instances() {
        let fleet = Fleet::new();
        let only = fleet.add("msg-1", "messaging");
        fleet.check(&only, false).await;

        let picked = fleet.discovery.discover("messaging", Strategy::RoundRobin).unwrap();

        assert_eq!(picked.id, only.id);
        assert!(!picked.is_healthy());
    }

    #[test]
    fn unknown_service_is_not_found() {
        let fleet = Fleet::new();
        fleet.add("msg-1", "messaging");

        let err = fleet.discovery.discover("plugin", Strategy::RoundRobin).unwrap_err();
        assert_eq!(
            err.current_context(),
            &DiscoveryError::NotFound {
                name: "plugin".to_string()
            }
        );
    }

    #[test]
    fn invalid_name_pattern_is_reported() {
        let fleet = Fleet::new();
        let err = fleet.discovery.discover("[rag", Strategy::RoundRobin).unwrap_err();
        assert!(matches!(
            err.current_context(),
            DiscoveryError::InvalidPattern { .. }
        ));
    }

    #[test]
    fn least_connections_prefers_idle_instances() {
        let fleet = Fleet::new();
        let busy = fleet.add("agent-1", "agent");
        let idle = fleet.add("agent-2", "agent");

        // Ties go to the earliest registered.
        assert_eq!(
            fleet.discovery.discover("agent", Strategy::LeastConnections).unwrap().id,
            busy.id
        );

        fleet.discovery.increment_connections(&busy.id);
        fleet.discovery.increment_connections(&busy.id);
        assert_eq!(
            fleet.discovery.discover("agent", Strategy::LeastConnections).unwrap().id,
            idle.id
        );
        // Discovery itself never touches the counters.
        assert_eq!(fleet.discovery.connections(&idle.id), 0);
        assert_eq!(fleet.discovery.connections(&busy.id), 2);
    }

    #[test]
    fn unregister_drops_connection_count() {
        let fleet = Fleet::new();
        let record = fleet.add("gw-1", "gateway");
        fleet.discovery.increment_connections(&record.id);

        assert_eq!(fleet.discovery.unregister(&record.id).map(|r| r.id), Some(record.id.clone()));
        assert_eq!(fleet.discovery.connections(&record.id), 0);
        assert!(fleet.discovery.counters.connections.is_empty());
        assert!(fleet.discovery.unregister(&record.id).is_none());
    }

    #[test]
    fn cursor_table_stays_bounded() {
        let counters = RoutingCounters::default();
        for n in 0..=MAX_ROUND_ROBIN_CURSORS {
            counters.next_cursor(&format!("svc-{n}"));
        }

        assert!(counters.cursors.len() <= MAX_ROUND_ROBIN_CURSORS);
        assert_eq!(counters.next_cursor("svc-0"), 0);
        assert_eq!(counters.next_cursor("svc-0"), 1);
    }

    #[test]
    fn connection_counts_never_go_negative() {
        let fleet = Fleet::new();
        let record = fleet.add("gw-1", "gateway");

        assert_eq!(fleet.discovery.decrement_connections(&record.id), 0);
        assert_eq!(fleet.discovery.increment_connections(&record.id), 1);
        assert_eq!(fleet.discovery.decrement_connections(&record.id), 0);
        assert_eq!(fleet.discovery.decrement_connections(&record.id), 0);
        assert_eq!(fleet.discovery.connections(&record.id), 0);
    }

    #[test]
    fn health_based_prefers_freshest_check() {
        let fleet = Fleet::new();
        let now = Utc::now();
        let record = |raw_id: &str, checked: Option<i64>| {
            let mut record = ServiceRecord::from_registration(
                ServiceRegistration::new(id(raw_id), "auth", "1.0.0", "http://auth"),
                now,
            );
            record.last_health_check = checked.map(|secs| now - TimeDelta::seconds(secs));
            record
        };
        let candidates = [
            record("auth-1", None),
            record("auth-2", Some(30)),
            record("auth-3", Some(5)),
        ];

        let picked = fleet
            .discovery
            .select("auth", &candidates, Strategy::HealthBased)
            .unwrap();
        assert_eq!(picked.id, id("auth-3"));

        let picked = fleet
            .discovery
            .select("auth", &candidates[..2], Strategy::HealthBased)
            .unwrap();
        assert_eq!(picked.id, id("auth-2"));
    }

    #[test]
    fn select_on_empty_candidates_is_none() {
        let fleet = Fleet::new();
        assert!(fleet.discovery.select("rag", &[], Strategy::Random).is_none());
    }
}
