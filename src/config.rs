use std::env;
use std::time::Duration;

use dotenvy::dotenv;

use crate::breaker::BreakerConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub accounts_service_url: String,
    pub redis_url: String,
    pub breaker_call_timeout_ms: u64,
    pub breaker_window_buckets: usize,
    pub breaker_bucket_width_ms: u64,
    pub breaker_failure_ratio: f64,
    pub breaker_min_volume: u64,
    pub breaker_reset_timeout_ms: u64,
    pub breaker_half_open_probes: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: env_or("SERVER_PORT", "3002")?,
            database_url: env::var("DATABASE_URL")?,
            accounts_service_url: env::var("ACCOUNTS_SERVICE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            breaker_call_timeout_ms: env_or("BREAKER_CALL_TIMEOUT_MS", "5000")?,
            breaker_window_buckets: env_or("BREAKER_WINDOW_BUCKETS", "10")?,
            breaker_bucket_width_ms: env_or("BREAKER_BUCKET_WIDTH_MS", "1000")?,
            breaker_failure_ratio: env_or("BREAKER_FAILURE_RATIO", "0.5")?,
            breaker_min_volume: env_or("BREAKER_MIN_VOLUME", "5")?,
            breaker_reset_timeout_ms: env_or("BREAKER_RESET_TIMEOUT_MS", "30000")?,
            breaker_half_open_probes: env_or("BREAKER_HALF_OPEN_PROBES", "1")?,
        })
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            call_timeout: Duration::from_millis(self.breaker_call_timeout_ms),
            window_buckets: self.breaker_window_buckets,
            bucket_width: Duration::from_millis(self.breaker_bucket_width_ms),
            failure_ratio: self.breaker_failure_ratio,
            min_volume: self.breaker_min_volume,
            reset_timeout: Duration::from_millis(self.breaker_reset_timeout_ms),
            half_open_probes: self.breaker_half_open_probes,
        }
    }
}

fn env_or<T>(key: &str, default: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(env::var(key).unwrap_or_else(|_| default.to_string()).parse()?)
}
