use crate::error::AppError;
use crate::middleware::UserId;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use uuid::Uuid;

/// DELETE /api/v1/messages/{id}
async fn delete_message(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    state
        .services
        .messages
        .delete(path.into_inner(), user.0)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/messages/{id}", web::delete().to(delete_message));
}
