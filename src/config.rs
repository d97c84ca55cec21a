// src/config.rs
// Explicit configuration: infra connections are required at boot, algorithm
// knobs are tunable with documented defaults. See §9 of the design notes for
// the full enumerated list of recognized tunables.

use std::env;

use lazy_static::lazy_static;

/// Read a required environment variable, exiting the process with the
/// documented "fatal config" exit code (1) if it is missing.
fn require_env(key: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => {
            tracing::error!("missing required environment variable: {key}");
            std::process::exit(1);
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Rerank fusion weights (§4.8). Must sum to 1.0 in the reference config but
/// that is a deployment convention, not an enforced invariant.
#[derive(Debug, Clone, Copy)]
pub struct RerankWeights {
    pub vector: f64,
    pub edge: f64,
    pub affinity: f64,
    pub recency: f64,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            vector: 0.4,
            edge: 0.3,
            affinity: 0.2,
            recency: 0.1,
        }
    }
}

/// Infra connections, required at boot. Missing any of these is a fatal
/// config error (exit code 1); failing to reach them at boot is exit code 2.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub qdrant_url: String,
    pub jwt_secret: String,
    pub llm_endpoint: String,
    pub llm_model: String,
    pub embedding_endpoint: String,
}

impl StoreConfig {
    fn from_env() -> Self {
        Self {
            database_url: require_env("DATABASE_URL"),
            qdrant_url: require_env("QDRANT_URL"),
            jwt_secret: require_env("JWT_SIGNING_SECRET"),
            llm_endpoint: require_env("LLM_ENDPOINT"),
            llm_model: require_env("LLM_MODEL"),
            embedding_endpoint: require_env("EMBEDDING_ENDPOINT"),
        }
    }
}

/// Algorithm tunables, enumerated in §9. All have defaults so a deployment
/// can omit them entirely.
#[derive(Debug, Clone)]
pub struct AlgoConfig {
    pub half_life_days: f64,
    pub edge_weight_floor: f64,
    pub vector_score_threshold: f64,
    pub rerank_weights: RerankWeights,
    pub recency_boost_window_days: i64,
    pub rerank_recency_boost: f64,
    pub top_k_min: usize,
    pub top_k_max: usize,
    pub clarification_rate_per_hour: u32,
    pub worker_poll_interval_s: u64,
    pub worker_lease_timeout_s: u64,
    pub dlq_retry_threshold: u32,
    pub idempotency_ttl_hours: i64,
    pub embedding_dim: usize,
    pub max_facts: usize,
    pub clarification_timeout_turns: u32,
    pub silence_decay_per_day: f64,
    pub silence_decay_floor: f64,
}

impl Default for AlgoConfig {
    fn default() -> Self {
        Self {
            half_life_days: env_f64("HALF_LIFE_DAYS", 30.0),
            edge_weight_floor: env_f64("EDGE_WEIGHT_FLOOR", 0.05),
            vector_score_threshold: env_f64("VECTOR_SCORE_THRESHOLD", 0.3),
            rerank_weights: RerankWeights::default(),
            recency_boost_window_days: env_u64("RECENCY_BOOST_WINDOW_DAYS", 7) as i64,
            rerank_recency_boost: env_f64("RERANK_RECENCY_BOOST", 0.15),
            top_k_min: env_usize("TOP_K_MIN", 10),
            top_k_max: env_usize("TOP_K_MAX", 20),
            clarification_rate_per_hour: env_u64("CLARIFICATION_RATE_PER_HOUR", 1) as u32,
            worker_poll_interval_s: env_u64("WORKER_POLL_INTERVAL_S", 30),
            worker_lease_timeout_s: env_u64("WORKER_LEASE_TIMEOUT_S", 300),
            dlq_retry_threshold: env_u64("DLQ_RETRY_THRESHOLD", 5) as u32,
            idempotency_ttl_hours: env_u64("IDEMPOTENCY_TTL_HOURS", 24) as i64,
            embedding_dim: env_usize("EMBEDDING_DIM", 1024),
            max_facts: env_usize("MAX_FACTS", 20),
            clarification_timeout_turns: env_u64("CLARIFICATION_TIMEOUT_TURNS", 3) as u32,
            silence_decay_per_day: env_f64("SILENCE_DECAY_PER_DAY", 0.01),
            silence_decay_floor: env_f64("SILENCE_DECAY_DAILY_CAP", 0.07),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
            log_level: env_or("RUST_LOG", "info"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub algo: AlgoConfig,
    pub server: ServerConfig,
}

impl Config {
    pub fn load() -> Self {
        let _ = dotenv::dotenv();
        Self {
            store: StoreConfig::from_env(),
            algo: AlgoConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

lazy_static! {
    /// Process-wide config singleton, populated at startup via `Config::init`.
    pub static ref CONFIG: parking_lot::RwLock<Option<Config>> = parking_lot::RwLock::new(None);
}

pub fn init_config() -> Config {
    let cfg = Config::load();
    *CONFIG.write() = Some(cfg.clone());
    cfg
}
