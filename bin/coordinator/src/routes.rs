//! Management API for the registry and discovery.

use crate::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use flotilla_core::ServiceId;
use flotilla_registry::{
    Discovery, HealthCheckResult, RegistryError, RegistryStatistics, ServiceRecord,
    ServiceRegistration, ServiceRegistry, Strategy,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tower_http::trace::TraceLayer;

/// State shared by all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: ServiceRegistry,
    pub discovery: Discovery,
}

impl AppState {
    #[must_use]
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            discovery: Discovery::new(registry.clone()),
            registry,
        }
    }
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/services", post(register).get(list))
        .route("/services/search", get(search))
        .route("/services/by-name/{name}", get(get_by_name))
        .route("/services/{id}", get(get_service).delete(unregister))
        .route("/services/{id}/health-check", post(health_check))
        .route(
            "/services/{id}/connections",
            post(open_connection).delete(close_connection),
        )
        .route("/discover/{name}", get(discover))
        .route("/statistics", get(statistics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<JsonValue> {
    Json(json!({ "status": "ok" }))
}

async fn register(
    State(state): State<AppState>,
    Json(registration): Json<ServiceRegistration>,
) -> Result<(StatusCode, Json<ServiceRecord>), ApiError> {
    let record = state.registry.register(registration)?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    healthy: bool,
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<ServiceRecord>> {
    if query.healthy {
        Json(state.registry.list_healthy())
    } else {
        Json(state.registry.list())
    }
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    pattern: String,
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<ServiceRecord>>, ApiError> {
    Ok(Json(state.registry.discover(&query.pattern)?))
}

async fn get_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServiceRecord>, ApiError> {
    state
        .registry
        .get_by_name(&name)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no instances of service '{name}'")))
}

async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<ServiceId>,
) -> Result<Json<ServiceRecord>, ApiError> {
    state
        .registry
        .get(&id)
        .map(Json)
        .ok_or_else(|| RegistryError::NotFound { id }.into())
}

async fn unregister(State(state): State<AppState>, Path(id): Path<ServiceId>) -> StatusCode {
    state.discovery.unregister(&id);
    StatusCode::NO_CONTENT
}

async fn health_check(
    State(state): State<AppState>,
    Path(id): Path<ServiceId>,
) -> Result<Json<HealthCheckResult>, ApiError> {
    Ok(Json(state.registry.perform_health_check(&id).await?))
}

#[derive(Debug, Serialize)]
struct ConnectionCount {
    id: ServiceId,
    connections: u64,
}

fn require_registered(state: &AppState, id: &ServiceId) -> Result<(), ApiError> {
    if state.registry.get(id).is_none() {
        return Err(RegistryError::NotFound { id: id.clone() }.into());
    }
    Ok(())
}

async fn open_connection(
    State(state): State<AppState>,
    Path(id): Path<ServiceId>,
) -> Result<Json<ConnectionCount>, ApiError> {
    require_registered(&state, &id)?;
    let connections = state.discovery.increment_connections(&id);
    Ok(Json(ConnectionCount { id, connections }))
}

async fn close_connection(
    State(state): State<AppState>,
    Path(id): Path<ServiceId>,
) -> Result<Json<ConnectionCount>, ApiError> {
    require_registered(&state, &id)?;
    let connections = state.discovery.decrement_connections(&id);
    Ok(Json(ConnectionCount { id, connections }))
}

#[derive(Debug, Deserialize)]
struct DiscoverQuery {
    strategy: Option<String>,
}

async fn discover(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<DiscoverQuery>,
) -> Result<Json<ServiceRecord>, ApiError> {
    let strategy = match query.strategy.as_deref() {
        Some(raw) => raw.parse::<Strategy>()?,
        None => Strategy::default(),
    };
    Ok(Json(state.discovery.discover(&name, strategy)?))
}

async fn statistics(State(state): State<AppState>) -> Json<RegistryStatistics> {
    Json(state.registry.statistics())
}
