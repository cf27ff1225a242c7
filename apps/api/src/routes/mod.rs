pub mod health;
pub mod submissions;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};

use crate::health::metrics::track_metrics;
use crate::ratelimit::{enforce, RateLimiter};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let window = Duration::from_secs(state.config.rate_limit_window_secs);
    let upload_limiter = Arc::new(RateLimiter::new(window, state.config.rate_limit_max_upload));
    let tailor_limiter = Arc::new(RateLimiter::new(window, state.config.rate_limit_max_tailor));

    // Multipart framing overhead on top of the two document limits.
    let upload_body_limit =
        state.config.max_cv_bytes + state.config.max_job_spec_bytes + 64 * 1024;

    Router::new()
        .route(
            "/upload",
            post(submissions::handle_upload)
                .route_layer(middleware::from_fn_with_state(upload_limiter, enforce))
                .route_layer(DefaultBodyLimit::max(upload_body_limit)),
        )
        .route(
            "/tailor-cv",
            post(submissions::handle_tailor)
                .route_layer(middleware::from_fn_with_state(tailor_limiter, enforce)),
        )
        .route("/submission/:id", get(submissions::handle_get_submission))
        .route("/health", get(health::handle_liveness))
        .route("/health/database", get(health::handle_database))
        .route("/health/redis", get(health::handle_redis))
        .route("/health/queue", get(health::handle_queue))
        .route("/health/system", get(health::handle_system))
        .route("/health/comprehensive", get(health::handle_comprehensive))
        .route("/metrics", get(health::handle_metrics))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            track_metrics,
        ))
        .with_state(state)
}
