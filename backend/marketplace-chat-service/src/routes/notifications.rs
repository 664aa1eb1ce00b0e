use crate::error::AppError;
use crate::middleware::UserId;
use crate::models::{NavigationTarget, Notification};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct NotificationView {
    #[serde(flatten)]
    pub notification: Notification,
    pub navigation: NavigationTarget,
}

impl From<Notification> for NotificationView {
    fn from(notification: Notification) -> Self {
        let navigation = notification.navigation_target();
        Self {
            notification,
            navigation,
        }
    }
}

/// GET /api/v1/notifications?limit=
async fn list_notifications(
    state: web::Data<AppState>,
    user: UserId,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, AppError> {
    let limit = query
        .limit
        .unwrap_or(state.config.notification_page_limit);
    let notifications = state
        .services
        .notifications
        .fetch_recent(user.0, limit)
        .await?;
    let views: Vec<NotificationView> = notifications.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(views))
}

/// GET /api/v1/notifications/unread-count
async fn unread_count(state: web::Data<AppState>, user: UserId) -> Result<HttpResponse, AppError> {
    let count = state.services.notifications.unread_count(user.0).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "count": count })))
}

/// PUT /api/v1/notifications/{id}/read
async fn mark_read(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let updated = state
        .services
        .notifications
        .mark_read(path.into_inner(), user.0)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "updated": updated })))
}

/// PUT /api/v1/notifications/read-all
async fn mark_all_read(state: web::Data<AppState>, user: UserId) -> Result<HttpResponse, AppError> {
    let updated = state.services.notifications.mark_all_read(user.0).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "updated": updated })))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/notifications")
            .route("", web::get().to(list_notifications))
            .route("/unread-count", web::get().to(unread_count))
            .route("/read-all", web::put().to(mark_all_read))
            .route("/{id}/read", web::put().to(mark_read)),
    );
}
