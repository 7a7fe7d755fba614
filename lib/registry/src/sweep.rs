//! Periodic health sweep.

use crate::registry::ServiceRegistry;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Shortest interval the sweep will tick at.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Background task probing every registered instance on an interval.
pub struct HealthSweep;

impl HealthSweep {
    /// Starts sweeping at the registry's configured interval.
    ///
    /// Must be called from within a tokio runtime. Each sweep spawns one probe
    /// per instance and does not wait for them, so a hung endpoint never
    /// delays the rest of the fleet. An instance whose previous probe is still
    /// in flight is skipped. Intervals below [`MIN_SWEEP_INTERVAL`] are raised
    /// to it.
    #[must_use]
    pub fn start(registry: ServiceRegistry) -> SweepHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let configured = registry.config().health_check_interval;
        let period = configured.max(MIN_SWEEP_INTERVAL);
        if period != configured {
            warn!(
                configured_ms = configured.as_millis(),
                interval_ms = period.as_millis(),
                "health check interval too short, clamped"
            );
        }

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = period.as_millis(), "health sweep started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let started = sweep_once(&registry);
                        debug!(probes = started, "health sweep tick");
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("health sweep stopped");
        });

        SweepHandle { stop_tx, task }
    }
}

/// Starts one probe per registered instance not already being probed.
/// Returns how many probes were started.
pub(crate) fn sweep_once(registry: &ServiceRegistry) -> usize {
    let mut started = 0;
    for id in registry.ids() {
        if registry.spawn_probe(id.clone()) {
            started += 1;
        } else {
            debug!(service_id = %id, "previous probe still running, skipping");
        }
    }
    started
}

/// Handle to a running [`HealthSweep`].
#[derive(Debug)]
pub struct SweepHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Signals the sweep to stop. Idempotent; probes already started run to
    /// completion.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stops the sweep and waits for the loop to exit.
    ///
    /// A loop that died early is reported rather than hidden.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            error!(error = %e, "health sweep task failed");
        }
    }

    /// Returns true once the sweep loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::scripted::ScriptedProbe;
    use crate::record::{ServiceRegistration, ServiceStatus};
    use crate::registry::RegistryConfig;
    use std::sync::Arc;

    fn registry_with(probe: Arc<ScriptedProbe>, interval: Duration) -> ServiceRegistry {
        let config = RegistryConfig {
            health_check_interval: interval,
            probe_timeout: Duration::from_secs(1),
        };
        ServiceRegistry::with_probe(config, probe)
    }

    fn registration(raw_id: &str) -> ServiceRegistration {
        ServiceRegistration::new(
            raw_id.parse().expect("valid id"),
            "worker",
            "1.0.0",
            format!("http://{raw_id}"),
        )
    }

    #[tokio::test]
    async fn sweep_probes_every_instance_repeatedly() {
        let probe = Arc::new(ScriptedProbe::default());
        let registry = registry_with(probe.clone(), Duration::from_millis(20));
        let sick = registry.register(registration("w-1")).unwrap();
        registry.register(registration("w-2")).unwrap();
        probe.set(&sick.health_endpoint(), false);

        let handle = HealthSweep::start(registry.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.shutdown().await;

        // Two initial probes plus several sweep rounds.
        assert!(probe.calls() >= 6, "only {} probes ran", probe.calls());
        assert_eq!(registry.get(&sick.id).unwrap().status, ServiceStatus::Unhealthy);
        assert_eq!(registry.statistics().healthy, 1);
    }

    #[tokio::test]
    async fn hung_probe_is_not_restarted() {
        let probe = Arc::new(ScriptedProbe::hanging());
        let registry = registry_with(probe.clone(), Duration::from_secs(60));
        // The registration probe hangs and holds the slot.
        registry.register(registration("w-1")).unwrap();

        assert_eq!(sweep_once(&registry), 0);
        assert_eq!(sweep_once(&registry), 0);
        assert_eq!(registry.probes_in_flight(), 1);
    }

    #[tokio::test]
    async fn sweep_skips_instance_still_on_registration_probe() {
        let probe = Arc::new(ScriptedProbe::hanging());
        let registry = registry_with(probe.clone(), Duration::from_millis(20));
        registry.register(registration("w-1")).unwrap();

        let handle = HealthSweep::start(registry.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn finished_probe_frees_its_slot() {
        let probe = Arc::new(ScriptedProbe::default());
        let registry = registry_with(probe, Duration::from_secs(60));
        registry.register(registration("w-1")).unwrap();

        for _ in 0..50 {
            if registry.probes_in_flight() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(registry.probes_in_flight(), 0);
        assert_eq!(sweep_once(&registry), 1);
    }

    #[tokio::test]
    async fn zero_interval_is_clamped_instead_of_killing_the_loop() {
        let probe = Arc::new(ScriptedProbe::default());
        let registry = registry_with(probe.clone(), Duration::ZERO);
        registry.register(registration("w-1")).unwrap();

        let handle = HealthSweep::start(registry);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!handle.is_finished());
        assert!(probe.calls() >= 2, "only {} probes ran", probe.calls());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn stop_ends_the_loop() {
        let probe = Arc::new(ScriptedProbe::default());
        let registry = registry_with(probe, Duration::from_secs(60));

        let handle = HealthSweep::start(registry);
        handle.stop();
        handle.stop();
        for _ in 0..50 {
            if handle.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(handle.is_finished());
    }
}
