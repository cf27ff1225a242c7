mod config;
mod db;
mod errors;
mod extract;
mod health;
mod llm_client;
mod models;
mod queue;
mod ratelimit;
mod render;
mod routes;
mod state;
mod store;
mod tailor;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use chrono::Utc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::health::metrics::MetricsState;
use crate::health::{run_sampler, SystemMonitor};
use crate::llm_client::LlmClient;
use crate::queue::broker::RedisBroker;
use crate::queue::{
    run_scheduler, JobQueue, MaintenanceHandler, QueuePolicy, Scheduler, Worker,
    MAINTENANCE_QUEUE, TAILORING_QUEUE,
};
use crate::render::HttpRenderEngine;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::artifacts::ArtifactStore;
use crate::store::{PgBackend, SubmissionCache, SubmissionStore};
use crate::tailor::{TailorGate, TailorJobHandler};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Retailor API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let pool = create_pool(&config.database_url).await?;

    // Initialize Redis
    let redis = redis::Client::open(config.redis_url.clone())?;
    info!("Redis client initialized");

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized");

    // Initialize LLM client
    let llm = Arc::new(LlmClient::new(config.anthropic_api_key.clone()));
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let renderer = Arc::new(HttpRenderEngine::new(
        config.renderer_url.clone(),
        Duration::from_secs(config.render_timeout_secs),
    ));

    let store = SubmissionStore::new(
        Arc::new(PgBackend::new(pool)),
        SubmissionCache::new(redis.clone(), config.cache_ttl_secs),
    );
    let artifacts = ArtifactStore::new(s3, config.s3_bucket.clone());
    let queue = Arc::new(JobQueue::new(
        Arc::new(RedisBroker::new(redis)),
        QueuePolicy::from_config(&config),
    ));
    // A shutdown leaves the pause flag set in Redis; clear it before the
    // worker starts polling.
    queue.resume_all().await?;

    let metrics = MetricsState::init();
    let monitor = SystemMonitor::default();
    let tailor_gate = TailorGate::default();

    // Build app state
    let state = AppState {
        config: config.clone(),
        store: store.clone(),
        artifacts,
        queue: queue.clone(),
        llm: llm.clone(),
        renderer,
        metrics,
        monitor: monitor.clone(),
        tailor_gate: tailor_gate.clone(),
    };

    // Background queue consumer
    let worker = Worker::new(queue.clone(), Duration::from_millis(config.worker_poll_ms))
        .register(
            TAILORING_QUEUE,
            Arc::new(TailorJobHandler::new(store.clone(), llm, tailor_gate)),
        )
        .register(
            MAINTENANCE_QUEUE,
            Arc::new(MaintenanceHandler::new(
                queue.clone(),
                vec![TAILORING_QUEUE.to_string(), MAINTENANCE_QUEUE.to_string()],
            )),
        );
    tokio::spawn(worker.run());

    // Periodic housekeeping fires through the maintenance queue
    let scheduler = Scheduler::new().every(
        "queue-maintenance",
        chrono::Duration::seconds(config.maintenance_interval_secs as i64),
        Utc::now(),
    );
    tokio::spawn(run_scheduler(scheduler, queue.clone()));

    // Background health sampler
    tokio::spawn(run_sampler(
        store,
        queue.clone(),
        monitor,
        Duration::from_secs(config.health_sample_interval_secs),
    ));

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors(&config));

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(queue))
    .await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "retailor-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}

fn build_cors(config: &Config) -> CorsLayer {
    if config.cors_origin == "*" {
        return CorsLayer::permissive();
    }
    match config.cors_origin.parse() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin))
            .allow_methods(Any)
            .allow_headers(Any),
        Err(_) => {
            warn!(
                "CORS_ORIGIN '{}' is not a valid origin, allowing all origins",
                config.cors_origin
            );
            CorsLayer::permissive()
        }
    }
}

/// Resolves on Ctrl-C. Pauses queue delivery so workers stop picking up new
/// jobs while in-flight requests drain; startup clears the flag again.
async fn shutdown_signal(queue: Arc<JobQueue>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        return;
    }
    info!("Shutdown signal received, pausing queue delivery");
    if let Err(e) = queue.pause_all().await {
        warn!("Could not pause queue delivery during shutdown: {e}");
    }
}
