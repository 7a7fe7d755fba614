use flotilla_coordinator::{config::CoordinatorConfig, events, routes};
use flotilla_registry::{HealthSweep, ServiceRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CoordinatorConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let registry = ServiceRegistry::new(config.registry.to_registry_config());
    let event_logger = events::spawn_event_logger(registry.subscribe());

    if let Some(me) = &config.self_registration {
        match registry.register(me.to_registration()) {
            Ok(record) => tracing::info!(service_id = %record.id, "Registered coordinator"),
            Err(e) => tracing::warn!(error = %e, "Failed to register coordinator"),
        }
    }

    let sweep = HealthSweep::start(registry.clone());

    let app = routes::router(routes::AppState::new(registry));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("Shutting down health sweep");
    sweep.shutdown().await;
    event_logger.abort();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
