//! Logging of registry events.

use flotilla_registry::{RegistryEvent, ServiceStatus, Subscription};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Logs every event of `events` until the subscription is cancelled.
pub fn spawn_event_logger(mut events: Subscription) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    })
}

fn log_event(event: &RegistryEvent) {
    match event {
        RegistryEvent::Registered { record } => {
            info!(service_id = %record.id, name = %record.name, "registry: service joined");
        }
        RegistryEvent::Unregistered { record } => {
            info!(service_id = %record.id, name = %record.name, "registry: service left");
        }
        RegistryEvent::HealthChecked { id, result } => {
            debug!(
                service_id = %id,
                healthy = result.healthy,
                latency_ms = result.latency_ms,
                "registry: health checked"
            );
        }
        RegistryEvent::StatusChanged { id, from, to } if *to == ServiceStatus::Unhealthy => {
            warn!(service_id = %id, %from, "registry: service unhealthy");
        }
        RegistryEvent::StatusChanged { id, from, to } => {
            info!(service_id = %id, %from, %to, "registry: service status changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_registry::{RegistryConfig, ServiceRegistration, ServiceRegistry};
    use std::time::Duration;

    #[tokio::test]
    async fn logger_runs_until_unsubscribed() {
        let registry = ServiceRegistry::new(RegistryConfig::default());
        let subscription = registry.subscribe();
        let id = subscription.id();
        let logger = spawn_event_logger(subscription);

        registry
            .register(ServiceRegistration::new(
                "rag-1".parse().unwrap(),
                "rag",
                "1.0.0",
                "http://127.0.0.1:1",
            ))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!logger.is_finished());

        assert!(registry.unsubscribe(id));
        tokio::time::timeout(Duration::from_secs(1), logger)
            .await
            .expect("logger should stop")
            .unwrap();
    }
}
