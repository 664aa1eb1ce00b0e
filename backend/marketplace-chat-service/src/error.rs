use crate::middleware::error_handling;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;
use uuid::Uuid;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("temporarily unavailable: {0}")]
    Transient(String),

    /// Messages were removed but the conversation row survived.
    #[error("conversation {conversation_id} partially deleted ({messages_deleted} messages removed)")]
    PartialDelete {
        conversation_id: Uuid,
        messages_deleted: u64,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self.clone())
    }
}

/// serialization_failure, deadlock_detected
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("row".into()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::Transient(e.to_string())
            }
            sqlx::Error::Database(ref db)
                if db
                    .code()
                    .is_some_and(|code| RETRYABLE_SQLSTATES.iter().any(|s| *s == code)) =>
            {
                AppError::Transient(e.to_string())
            }
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_timeout() || e.is_connection_dropped() {
            AppError::Transient(e.to_string())
        } else {
            AppError::Internal(format!("redis: {e}"))
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("serialization: {e}"))
    }
}

impl AppError {
    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        AppError::InvalidInput(reason.into())
    }

    /// Whether the caller may repeat the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Transient(_) | AppError::PartialDelete { .. }
        )
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::InvalidInput(_) => 400,
            AppError::Unauthorized => 401,
            AppError::Forbidden => 403,
            AppError::NotFound(_) => 404,
            AppError::Transient(_) | AppError::PartialDelete { .. } => 503,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Internal(_) => 500,
        }
    }
}
