//! Runtime configuration (§6), loaded from the environment the way the
//! original server's `main.rs` loads `DATABASE_URL`/`BIND_ADDR`.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub log_level: String,

    pub validation_workers: usize,
    pub broadcast_workers: usize,
    pub storage_workers: usize,

    pub ingress_soft_limit: usize,
    pub ingress_hard_limit: usize,

    pub outbound_soft_limit: usize,
    pub outbound_hard_limit: usize,

    pub storage_batch_size: usize,
    pub storage_flush_ms: u64,

    pub broadcast_max_age_seconds: i64,
    pub max_event_bytes: usize,
    pub max_filters_per_req: usize,
    pub max_historical_limit: u32,
    pub query_deadline_ms: u64,

    pub policy_cache_ttl_secs: u64,
}

impl Config {
    /// Loads every option from the environment, falling back to the
    /// §6 defaults. `DATABASE_URL` has no default — missing it is a
    /// startup error.
    pub fn from_env() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Config {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned()),

            validation_workers: env_usize("VALIDATION_WORKERS", (cores * 3 / 4).max(1)),
            broadcast_workers: env_usize("BROADCAST_WORKERS", 1),
            storage_workers: env_usize("STORAGE_WORKERS", (cores / 4).max(1)),

            ingress_soft_limit: env_usize("INGRESS_SOFT_LIMIT", 10_000),
            ingress_hard_limit: env_usize("INGRESS_HARD_LIMIT", 100_000),

            outbound_soft_limit: env_usize("OUTBOUND_SOFT_LIMIT", 1_000),
            outbound_hard_limit: env_usize("OUTBOUND_HARD_LIMIT", 10_000),

            storage_batch_size: env_usize("STORAGE_BATCH_SIZE", 1_000),
            storage_flush_ms: env_u64("STORAGE_FLUSH_MS", 1_000),

            broadcast_max_age_seconds: env_i64("BROADCAST_MAX_AGE_SECONDS", 0),
            max_event_bytes: env_usize("MAX_EVENT_BYTES", 500_000),
            max_filters_per_req: env_usize("MAX_FILTERS_PER_REQ", 10),
            max_historical_limit: env_usize("MAX_HISTORICAL_LIMIT", 5_000) as u32,
            query_deadline_ms: env_u64("QUERY_DEADLINE_MS", 10_000),

            policy_cache_ttl_secs: env_u64("POLICY_CACHE_TTL_SECS", 30),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
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

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_usize_falls_back_to_default_when_unset() {
        assert_eq!(env_usize("RELAY_TEST_NONEXISTENT_KEY_XYZ", 42), 42);
    }

    #[test]
    fn env_usize_parses_set_value() {
        std::env::set_var("RELAY_TEST_PARSE_KEY_XYZ", "7");
        assert_eq!(env_usize("RELAY_TEST_PARSE_KEY_XYZ", 42), 7);
        std::env::remove_var("RELAY_TEST_PARSE_KEY_XYZ");
    }
}
