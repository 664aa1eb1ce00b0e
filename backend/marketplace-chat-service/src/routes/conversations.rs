use crate::error::AppError;
use crate::middleware::UserId;
use crate::models::{Conversation, ListingId, Message};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub listing_id: ListingId,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// Conversation plus its most recent message, for the Messages page.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationListItem {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub last_message: Option<Message>,
}

/// POST /api/v1/conversations
async fn resolve_or_create(
    state: web::Data<AppState>,
    user: UserId,
    body: web::Json<CreateConversationRequest>,
) -> Result<HttpResponse, AppError> {
    let conversation = state
        .services
        .conversations
        .resolve_or_create(body.listing_id, user.0)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// GET /api/v1/conversations
async fn list_conversations(
    state: web::Data<AppState>,
    user: UserId,
) -> Result<HttpResponse, AppError> {
    let conversations = state.services.conversations.list_for_user(user.0).await?;

    let mut items = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        let last_message = state.services.messages.latest(conversation.id).await?;
        items.push(ConversationListItem {
            conversation,
            last_message,
        });
    }
    Ok(HttpResponse::Ok().json(items))
}

/// GET /api/v1/conversations/{id}
async fn get_conversation(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let conversation = state
        .services
        .conversations
        .open_existing(path.into_inner(), user.0)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// DELETE /api/v1/conversations/{id}
async fn delete_conversation(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    state
        .services
        .conversations
        .delete(path.into_inner(), user.0)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// GET /api/v1/conversations/{id}/messages
async fn list_messages(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = path.into_inner();
    state
        .services
        .conversations
        .open_existing(conversation_id, user.0)
        .await?;
    let messages = state.services.messages.list_ordered(conversation_id).await?;
    Ok(HttpResponse::Ok().json(messages))
}

/// POST /api/v1/conversations/{id}/messages
async fn send_message(
    state: web::Data<AppState>,
    user: UserId,
    path: web::Path<Uuid>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .services
        .send_message(path.into_inner(), user.0, &body.content)
        .await?;
    Ok(HttpResponse::Created().json(message))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/conversations")
            .route("", web::post().to(resolve_or_create))
            .route("", web::get().to(list_conversations))
            .route("/{id}", web::get().to(get_conversation))
            .route("/{id}", web::delete().to(delete_conversation))
            .route("/{id}/messages", web::get().to(list_messages))
            .route("/{id}/messages", web::post().to(send_message)),
    );
}
