use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::config::Config;

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub redis: bool,
    pub accounts: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.redis && self.accounts
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("Redis Connectivity:    {}", status(self.redis));
        println!("Accounts Service:      {}", status(self.accounts));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!(
            "\nOverall Status: {}",
            if self.is_valid() { "✅ PASS" } else { "❌ FAIL" }
        );
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok {
        "✅ OK"
    } else {
        "❌ FAIL"
    }
}

pub async fn validate_environment(config: &Config, pool: &PgPool) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        redis: true,
        accounts: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    if let Err(e) = validate_redis(&config.redis_url).await {
        report.redis = false;
        report.errors.push(format!("Redis: {}", e));
    }

    if let Err(e) = validate_accounts_service(&config.accounts_service_url).await {
        report.accounts = false;
        report.errors.push(format!("Accounts service: {}", e));
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.accounts_service_url.is_empty() {
        anyhow::bail!("ACCOUNTS_SERVICE_URL is empty");
    }
    if config.redis_url.is_empty() {
        anyhow::bail!("REDIS_URL is empty");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if !(0.0..=1.0).contains(&config.breaker_failure_ratio) {
        anyhow::bail!("BREAKER_FAILURE_RATIO must be between 0.0 and 1.0");
    }
    if config.breaker_window_buckets == 0 {
        anyhow::bail!("BREAKER_WINDOW_BUCKETS must be greater than 0");
    }

    url::Url::parse(&config.accounts_service_url)
        .context("ACCOUNTS_SERVICE_URL is not a valid URL")?;

    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

async fn validate_redis(redis_url: &str) -> Result<()> {
    let client = redis::Client::open(redis_url).context("Invalid Redis URL")?;

    let mut conn = client
        .get_multiplexed_tokio_connection()
        .await
        .context("Failed to connect to Redis")?;

    redis::cmd("PING")
        .query_async::<_, String>(&mut conn)
        .await
        .context("Redis PING failed")?;

    Ok(())
}

async fn validate_accounts_service(base_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let response = client
        .get(format!("{}/health", base_url.trim_end_matches('/')))
        .send()
        .await
        .context("Failed to connect to accounts service")?;

    if !response.status().is_success() {
        anyhow::bail!("Accounts service returned status: {}", response.status());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            server_port: 3002,
            database_url: "postgres://localhost:5432/remit".to_string(),
            accounts_service_url: "http://localhost:3001".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            breaker_call_timeout_ms: 5000,
            breaker_window_buckets: 10,
            breaker_bucket_width_ms: 1000,
            breaker_failure_ratio: 0.5,
            breaker_min_volume: 5,
            breaker_reset_timeout_ms: 30000,
            breaker_half_open_probes: 1,
        }
    }

    #[test]
    fn accepts_a_complete_config() {
        assert!(validate_env_vars(&sample_config()).is_ok());
    }

    #[test]
    fn rejects_empty_database_url() {
        let mut config = sample_config();
        config.database_url = String::new();
        assert!(validate_env_vars(&config).is_err());
    }

    #[test]
    fn rejects_invalid_accounts_url() {
        let mut config = sample_config();
        config.accounts_service_url = "not-a-url".to_string();
        assert!(validate_env_vars(&config).is_err());
    }

    #[test]
    fn rejects_out_of_range_failure_ratio() {
        let mut config = sample_config();
        config.breaker_failure_ratio = 1.5;
        assert!(validate_env_vars(&config).is_err());
    }
}
