use crate::error::AppError;
use db_pool::parse_env_with_default;
use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local store for demos and tests; nothing survives a restart.
    Memory,
}

#[derive(Debug, Clone)]
pub struct StreamsConfig {
    pub batch_size: usize,
    pub block_ms: u64,
    /// Approximate cap on retained entries (XTRIM MAXLEN ~).
    pub max_len: usize,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            block_ms: 5000,
            max_len: 50_000,
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub storage: StorageBackend,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub port: u16,
    pub jwt_secret: String,
    pub max_message_length: usize,
    pub notification_page_limit: i64,
    pub message_preview_chars: usize,
    pub streams: StreamsConfig,
    /// `id=seller_uuid:title,...` listings loaded into the memory backend.
    pub seed_listings: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("storage", &self.storage)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("redis_url", &self.redis_url)
            .field("port", &self.port)
            .field("jwt_secret", &"[REDACTED]")
            .field("max_message_length", &self.max_message_length)
            .field("notification_page_limit", &self.notification_page_limit)
            .field("message_preview_chars", &self.message_preview_chars)
            .field("streams", &self.streams)
            .field("seed_listings", &self.seed_listings)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Memory,
            database_url: None,
            redis_url: None,
            port: 8080,
            jwt_secret: String::new(),
            max_message_length: 4000,
            notification_page_limit: 20,
            message_preview_chars: 60,
            streams: StreamsConfig::default(),
            seed_listings: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_vars()
    }

    /// Same as [`Config::from_env`] without touching `.env`.
    pub fn from_vars() -> Result<Self, AppError> {
        let storage = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "postgres".into())
            .to_ascii_lowercase()
            .as_str()
        {
            "postgres" | "postgresql" => StorageBackend::Postgres,
            "memory" => StorageBackend::Memory,
            other => {
                return Err(AppError::Config(format!(
                    "STORAGE_BACKEND must be postgres or memory, got {other}"
                )))
            }
        };

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        if storage == StorageBackend::Postgres && database_url.is_none() {
            return Err(AppError::Config("DATABASE_URL missing".into()));
        }

        let jwt_secret = env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Config("JWT_SECRET missing".into()))?;

        let redis_url = env::var("REDIS_URL").ok().filter(|s| !s.is_empty());

        let max_message_length = parse_env_with_default("MAX_MESSAGE_LENGTH", 4000usize);
        if max_message_length == 0 {
            return Err(AppError::Config("MAX_MESSAGE_LENGTH must be positive".into()));
        }

        Ok(Self {
            storage,
            database_url,
            redis_url,
            port: parse_env_with_default("PORT", 8080),
            jwt_secret,
            max_message_length,
            notification_page_limit: parse_env_with_default("NOTIFICATION_PAGE_LIMIT", 20i64)
                .clamp(1, 100),
            message_preview_chars: parse_env_with_default("MESSAGE_PREVIEW_CHARS", 60usize),
            streams: StreamsConfig {
                batch_size: parse_env_with_default("STREAM_BATCH_SIZE", 100usize),
                block_ms: parse_env_with_default("STREAM_BLOCK_MS", 5000u64),
                ..StreamsConfig::default()
            },
            seed_listings: env::var("MEMORY_SEED_LISTINGS")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "STORAGE_BACKEND",
        "DATABASE_URL",
        "JWT_SECRET",
        "REDIS_URL",
        "PORT",
        "MAX_MESSAGE_LENGTH",
        "NOTIFICATION_PAGE_LIMIT",
        "MESSAGE_PREVIEW_CHARS",
        "STREAM_BATCH_SIZE",
        "STREAM_BLOCK_MS",
        "MEMORY_SEED_LISTINGS",
    ];

    fn reset() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn postgres_requires_database_url() {
        reset();
        env::set_var("JWT_SECRET", "s3cret");
        let err = Config::from_vars().unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("DATABASE_URL")));
        reset();
    }

    #[test]
    #[serial]
    fn memory_backend_defaults() {
        reset();
        env::set_var("STORAGE_BACKEND", "memory");
        env::set_var("JWT_SECRET", "s3cret");
        let cfg = Config::from_vars().unwrap();
        assert_eq!(cfg.storage, StorageBackend::Memory);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.max_message_length, 4000);
        assert_eq!(cfg.notification_page_limit, 20);
        assert_eq!(cfg.message_preview_chars, 60);
        assert_eq!(cfg.streams.batch_size, 100);
        assert_eq!(cfg.streams.block_ms, 5000);
        assert!(cfg.redis_url.is_none());
        assert!(cfg.seed_listings.is_none());
        reset();
    }

    #[test]
    #[serial]
    fn jwt_secret_is_mandatory() {
        reset();
        env::set_var("STORAGE_BACKEND", "memory");
        assert!(matches!(Config::from_vars(), Err(AppError::Config(_))));
        reset();
    }

    #[test]
    #[serial]
    fn page_limit_is_clamped() {
        reset();
        env::set_var("STORAGE_BACKEND", "memory");
        env::set_var("JWT_SECRET", "s3cret");
        env::set_var("NOTIFICATION_PAGE_LIMIT", "5000");
        assert_eq!(Config::from_vars().unwrap().notification_page_limit, 100);
        reset();
    }

    #[test]
    #[serial]
    fn unknown_backend_rejected() {
        reset();
        env::set_var("STORAGE_BACKEND", "sqlite");
        env::set_var("JWT_SECRET", "s3cret");
        assert!(Config::from_vars().is_err());
        reset();
    }

    #[test]
    fn debug_hides_secrets() {
        let cfg = Config {
            jwt_secret: "topsecret".into(),
            database_url: Some("postgres://u:pw@h/db".into()),
            ..Config::default()
        };
        let out = format!("{cfg:?}");
        assert!(!out.contains("topsecret"));
        assert!(!out.contains("pw@h"));
    }
}
