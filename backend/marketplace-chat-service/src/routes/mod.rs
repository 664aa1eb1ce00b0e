pub mod conversations;
pub mod messages;
pub mod notifications;
pub mod wsroute;

use crate::error::AppError;
use crate::metrics::serve_metrics;
use crate::middleware::JwtAuthMiddleware;
use crate::state::AppState;
use actix_web::{web, HttpResponse};

async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "storage": format!("{:?}", state.config.storage).to_lowercase(),
        "cross_instance_fanout": state.redis.is_some(),
    }))
}

/// Authenticated REST surface, mounted under `/api/v1`.
pub fn register_api(cfg: &mut web::ServiceConfig) {
    conversations::register_routes(cfg);
    messages::register_routes(cfg);
    notifications::register_routes(cfg);
}

/// Everything the service serves. Shared by `main` and the HTTP tests.
pub fn configure_app(cfg: &mut web::ServiceConfig, state: AppState) {
    let auth = JwtAuthMiddleware::new(
        state.config.jwt_secret.clone(),
        state.token_metadata.clone(),
    );

    cfg.app_data(web::Data::new(state))
        .app_data(
            web::JsonConfig::default()
                .error_handler(|err, _req| AppError::InvalidInput(err.to_string()).into()),
        )
        .app_data(
            web::PathConfig::default()
                .error_handler(|err, _req| AppError::InvalidInput(err.to_string()).into()),
        )
        .app_data(
            web::QueryConfig::default()
                .error_handler(|err, _req| AppError::InvalidInput(err.to_string()).into()),
        )
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(serve_metrics))
        .service(wsroute::ws_handler)
        .service(web::scope("/api/v1").wrap(auth).configure(register_api));
}
