use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::health::metrics::MetricsSnapshot;
use crate::health::{
    check_cache, check_database, check_queue, check_system, sample_report, ComponentHealth,
    HealthReport,
};
use crate::state::AppState;

/// GET /health
/// Liveness only: the process is up and serving.
pub async fn handle_liveness() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "retailor-api"
    }))
}

/// GET /health/database
pub async fn handle_database(State(state): State<AppState>) -> (StatusCode, Json<ComponentHealth>) {
    let health = check_database(&state.store).await;
    (health.tier.http_status(), Json(health))
}

/// GET /health/redis
pub async fn handle_redis(State(state): State<AppState>) -> (StatusCode, Json<ComponentHealth>) {
    let health = check_cache(&state.store).await;
    (health.tier.http_status(), Json(health))
}

/// GET /health/queue
pub async fn handle_queue(State(state): State<AppState>) -> (StatusCode, Json<ComponentHealth>) {
    let health = check_queue(&state.queue).await;
    (health.tier.http_status(), Json(health))
}

/// GET /health/system
pub async fn handle_system(State(state): State<AppState>) -> (StatusCode, Json<ComponentHealth>) {
    let health = check_system(&state.monitor);
    (health.tier.http_status(), Json(health))
}

/// GET /health/comprehensive
/// All components plus the composite tier; 503 when any component is
/// unhealthy.
pub async fn handle_comprehensive(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthReport>) {
    let report = sample_report(&state.store, &state.queue, &state.monitor).await;
    (report.tier.http_status(), Json(report))
}

/// GET /metrics
pub async fn handle_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
