use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing; tuning knobs fall back
/// to defaults.
#[derive(Debug, Clone)]
pub struct Config {
    // Infrastructure endpoints and credentials.
    pub database_url: String,
    pub redis_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub anthropic_api_key: String,
    pub renderer_url: String,

    // HTTP surface.
    pub port: u16,
    pub rust_log: String,
    pub cors_origin: String,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_upload: u32,
    pub rate_limit_max_tailor: u32,

    // Upload limits. The CV and the job spec have separate caps.
    pub max_cv_bytes: usize,
    pub max_job_spec_bytes: usize,
    pub allowed_cv_media_types: Vec<String>,
    pub allowed_cv_extensions: Vec<String>,

    // Cache.
    pub cache_ttl_secs: u64,

    // Job queue tuning.
    pub queue_max_attempts: u32,
    pub queue_backoff_base_ms: u64,
    pub queue_backoff_cap_ms: u64,
    pub queue_retention: usize,
    pub queue_lease_secs: u64,
    pub worker_poll_ms: u64,
    pub maintenance_interval_secs: u64,

    // Health and rendering.
    pub health_sample_interval_secs: u64,
    pub render_timeout_secs: u64,
}

const DEFAULT_MEDIA_TYPES: &str = "application/pdf,\
application/vnd.openxmlformats-officedocument.wordprocessingml.document,\
text/plain";
const DEFAULT_EXTENSIONS: &str = ".pdf,.docx,.txt";

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            renderer_url: require_env("RENDERER_URL")?,
            port: env_or("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            cors_origin: std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            rate_limit_window_secs: env_or("RATE_LIMIT_WINDOW_SECS", 60)?,
            rate_limit_max_upload: env_or("RATE_LIMIT_MAX_UPLOAD", 10)?,
            rate_limit_max_tailor: env_or("RATE_LIMIT_MAX_TAILOR", 5)?,
            max_cv_bytes: env_or("MAX_CV_BYTES", 5 * 1024 * 1024)?,
            max_job_spec_bytes: env_or("MAX_JOB_SPEC_BYTES", 2 * 1024 * 1024)?,
            allowed_cv_media_types: env_csv("ALLOWED_CV_MEDIA_TYPES", DEFAULT_MEDIA_TYPES),
            allowed_cv_extensions: env_csv("ALLOWED_CV_EXTENSIONS", DEFAULT_EXTENSIONS),
            cache_ttl_secs: env_or("CACHE_TTL_SECS", 1800)?,
            queue_max_attempts: env_or("QUEUE_MAX_ATTEMPTS", 3)?,
            queue_backoff_base_ms: env_or("QUEUE_BACKOFF_BASE_MS", 2000)?,
            queue_backoff_cap_ms: env_or("QUEUE_BACKOFF_CAP_MS", 60_000)?,
            queue_retention: env_or("QUEUE_RETENTION", 100)?,
            queue_lease_secs: env_or("QUEUE_LEASE_SECS", 120)?,
            worker_poll_ms: env_or("WORKER_POLL_MS", 500)?,
            maintenance_interval_secs: env_or("MAINTENANCE_INTERVAL_SECS", 60)?,
            health_sample_interval_secs: env_or("HEALTH_SAMPLE_INTERVAL_SECS", 300)?,
            render_timeout_secs: env_or("RENDER_TIMEOUT_SECS", 30)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value")),
        Err(_) => Ok(default),
    }
}

fn env_csv(key: &str, default: &str) -> Vec<String> {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    parse_csv(&raw)
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
