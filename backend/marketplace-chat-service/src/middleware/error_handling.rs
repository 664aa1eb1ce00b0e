use crate::error::AppError;
use actix_web::{http::StatusCode, HttpResponse};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: String,
    pub status: u16,
    #[serde(default)]
    pub retryable: bool,
}

pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let code = match err {
        AppError::InvalidInput(_) => "INVALID_INPUT",
        AppError::Unauthorized => "UNAUTHORIZED",
        AppError::Forbidden => "FORBIDDEN",
        AppError::NotFound(_) => "NOT_FOUND",
        AppError::Transient(_) => "TEMPORARILY_UNAVAILABLE",
        AppError::PartialDelete { .. } => "PARTIAL_DELETE",
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal(_) => {
            "INTERNAL_SERVER_ERROR"
        }
        AppError::Database(_) => "DATABASE_ERROR",
    };

    // Infrastructure details stay in the logs.
    let message = if status.is_server_error() && !err.is_retryable() {
        tracing::error!(error = %err, "request failed");
        "internal server error".to_string()
    } else {
        err.to_string()
    };

    let response = ErrorResponse {
        error: status
            .canonical_reason()
            .unwrap_or("Error")
            .to_string(),
        message,
        code: code.to_string(),
        status: status.as_u16(),
        retryable: err.is_retryable(),
    };

    (status, response)
}

pub fn into_response(err: AppError) -> HttpResponse {
    let (status, response) = map_error(&err);
    HttpResponse::build(status).json(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn maps_taxonomy_to_status_codes() {
        let cases = [
            (AppError::invalid("x"), 400, "INVALID_INPUT"),
            (AppError::Unauthorized, 401, "UNAUTHORIZED"),
            (AppError::Forbidden, 403, "FORBIDDEN"),
            (AppError::not_found("x"), 404, "NOT_FOUND"),
            (AppError::Transient("pool".into()), 503, "TEMPORARILY_UNAVAILABLE"),
            (
                AppError::PartialDelete {
                    conversation_id: Uuid::nil(),
                    messages_deleted: 1,
                },
                503,
                "PARTIAL_DELETE",
            ),
            (AppError::Database("boom".into()), 500, "DATABASE_ERROR"),
        ];
        for (err, status, code) in cases {
            let (s, body) = map_error(&err);
            assert_eq!(s.as_u16(), status);
            assert_eq!(body.status, status);
            assert_eq!(body.code, code);
        }
    }

    #[test]
    fn server_errors_hide_details() {
        let (_, body) = map_error(&AppError::Database("password=hunter2".into()));
        assert_eq!(body.message, "internal server error");
        assert!(!body.retryable);

        let (_, body) = map_error(&AppError::Transient("pool timed out".into()));
        assert!(body.message.contains("pool timed out"));
        assert!(body.retryable);
    }
}
