use crate::{
    config::Config,
    error::AppResult,
    models::Message,
    realtime::ChangeFeed,
    redis_client::RedisClient,
    repository::{ConversationRepository, MessageRepository, NotificationRepository},
    services::{
        self, AuthMetadata, ConversationDirectory, DisplayNameResolver, ListingDirectory,
        MessageStore, NotificationCenter, ProfileDirectory, TokenMetadataCache,
    },
};
use std::sync::Arc;
use uuid::Uuid;

/// Storage and collaborator handles the services are built from.
pub struct Backends {
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub listings: Arc<dyn ListingDirectory>,
    pub profiles: Arc<dyn ProfileDirectory>,
    pub auth_metadata: Arc<dyn AuthMetadata>,
}

/// The chat core, shared by HTTP handlers and client-side controllers.
#[derive(Clone)]
pub struct ChatServices {
    pub conversations: ConversationDirectory,
    pub messages: MessageStore,
    pub notifications: NotificationCenter,
    pub names: DisplayNameResolver,
    pub feed: ChangeFeed,
    pub preview_chars: usize,
}

impl ChatServices {
    pub fn build(
        backends: Backends,
        feed: ChangeFeed,
        max_message_length: usize,
        preview_chars: usize,
    ) -> Self {
        let names = DisplayNameResolver::new(backends.profiles.clone(), backends.auth_metadata);
        let notifications =
            NotificationCenter::new(backends.notifications, backends.profiles, feed.clone());
        let conversations = ConversationDirectory::new(
            backends.conversations,
            backends.messages.clone(),
            backends.listings,
            notifications.clone(),
            names.clone(),
            feed.clone(),
        );
        let messages = MessageStore::new(
            backends.messages,
            conversations.clone(),
            feed.clone(),
            max_message_length,
        );

        Self {
            conversations,
            messages,
            notifications,
            names,
            feed,
            preview_chars,
        }
    }

    /// Append and notify the other participant. Notification failure does not
    /// fail the send.
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> AppResult<Message> {
        let message = self.messages.append(conversation_id, sender_id, content).await?;
        self.notify_message(&message).await;
        Ok(message)
    }

    pub(crate) async fn notify_message(&self, message: &Message) {
        match self.conversations.find(message.conversation_id).await {
            Ok(Some(conversation)) => {
                services::notify_recipient(
                    &self.notifications,
                    &self.names,
                    &conversation,
                    message,
                    self.preview_chars,
                )
                .await
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(
                conversation_id = %message.conversation_id,
                error = %e,
                "skipping message notification, conversation lookup failed"
            ),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub services: ChatServices,
    pub config: Arc<Config>,
    /// Display names from verified tokens
    pub token_metadata: TokenMetadataCache,
    pub redis: Option<RedisClient>,
}
