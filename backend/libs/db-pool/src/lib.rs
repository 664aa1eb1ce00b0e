//! PostgreSQL pool construction shared by the marketplace services.
//!
//! Pool sizing comes from `DB_*` environment variables with per-service
//! defaults; the returned pool reports its occupancy to Prometheus.

mod env;
mod metrics;

pub use env::{parse_env_optional, parse_env_with_default};
pub use metrics::acquire_with_metrics;
use metrics::update_pool_metrics;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info};

/// Connection pool settings
#[derive(Clone)]
pub struct DbConfig {
    /// Label used for metrics and logs
    pub service_name: String,
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Budget for the startup `SELECT 1` probe
    pub connect_timeout_secs: u64,
    /// How long a caller waits for a free connection
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("service_name", &self.service_name)
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("max_lifetime_secs", &self.max_lifetime_secs)
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            service_name: String::from("unknown"),
            database_url: String::new(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout_secs: 5,
            acquire_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

impl DbConfig {
    /// Build a config for `service_name`, reading `DATABASE_URL` and the
    /// optional `DB_*` overrides.
    pub fn from_env(service_name: &str) -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL environment variable not set".to_string())?;
        let mut cfg = Self::for_service(service_name);
        cfg.database_url = database_url;
        Ok(cfg)
    }

    /// Defaults sized for the given service, still honouring `DB_*` overrides.
    /// The URL is left empty for the caller to fill in.
    pub fn for_service(service_name: &str) -> Self {
        // chat traffic is bursty and mostly short queries
        let (max, min) = match service_name {
            "marketplace-chat-service" => (16, 4),
            _ => (4, 1),
        };

        Self {
            service_name: service_name.to_string(),
            database_url: String::new(),
            max_connections: parse_env_with_default("DB_MAX_CONNECTIONS", max),
            min_connections: parse_env_with_default("DB_MIN_CONNECTIONS", min),
            connect_timeout_secs: parse_env_with_default("DB_CONNECT_TIMEOUT_SECS", 5),
            acquire_timeout_secs: parse_env_with_default("DB_ACQUIRE_TIMEOUT_SECS", 10),
            idle_timeout_secs: parse_env_with_default("DB_IDLE_TIMEOUT_SECS", 600),
            max_lifetime_secs: parse_env_with_default("DB_MAX_LIFETIME_SECS", 1800),
        }
    }

    pub fn log_config(&self) {
        info!(
            service = %self.service_name,
            max_connections = self.max_connections,
            min_connections = self.min_connections,
            acquire_timeout_secs = self.acquire_timeout_secs,
            idle_timeout_secs = self.idle_timeout_secs,
            max_lifetime_secs = self.max_lifetime_secs,
            "database pool configuration"
        );
    }
}

/// Open the pool, verify it with a bounded `SELECT 1`, and start the
/// background metrics refresher.
pub async fn create_pool(config: DbConfig) -> Result<PgPool, sqlx::Error> {
    debug!(service = %config.service_name, "creating database pool");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .test_before_acquire(true)
        .connect(&config.database_url)
        .await?;

    let probe = tokio::time::timeout(
        Duration::from_secs(config.connect_timeout_secs),
        sqlx::query("SELECT 1").execute(&pool),
    )
    .await;

    match probe {
        Ok(Ok(_)) => {
            info!(service = %config.service_name, "database pool ready");
            update_pool_metrics(&pool, &config.service_name);

            let pool_clone = pool.clone();
            let service = config.service_name.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(30));
                loop {
                    interval.tick().await;
                    update_pool_metrics(&pool_clone, &service);
                }
            });

            Ok(pool)
        }
        Ok(Err(e)) => {
            error!(service = %config.service_name, error = %e, "database probe failed");
            Err(e)
        }
        Err(_) => {
            error!(
                service = %config.service_name,
                timeout_secs = config.connect_timeout_secs,
                "database probe timed out"
            );
            Err(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "database verification timeout",
            )))
        }
    }
}
