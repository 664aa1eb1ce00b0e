use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{Message, NewMessage};
use crate::realtime::{ChangeFeed, ChangeKind};
use crate::repository::MessageRepository;
use crate::services::conversation_service::ConversationDirectory;
use std::sync::Arc;
use uuid::Uuid;

/// Append-only per-conversation message log.
#[derive(Clone)]
pub struct MessageStore {
    repo: Arc<dyn MessageRepository>,
    conversations: ConversationDirectory,
    feed: ChangeFeed,
    max_length: usize,
}

impl MessageStore {
    pub fn new(
        repo: Arc<dyn MessageRepository>,
        conversations: ConversationDirectory,
        feed: ChangeFeed,
        max_length: usize,
    ) -> Self {
        Self {
            repo,
            conversations,
            feed,
            max_length,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub async fn append(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> AppResult<Message> {
        if content.trim().is_empty() {
            return Err(AppError::invalid("message content is empty"));
        }
        if content.chars().count() > self.max_length {
            return Err(AppError::invalid(format!(
                "message longer than {} characters",
                self.max_length
            )));
        }

        let conversation = self
            .conversations
            .find(conversation_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("conversation {conversation_id}")))?;
        if !conversation.is_participant(sender_id) {
            return Err(AppError::Forbidden);
        }

        let message = self
            .repo
            .insert(NewMessage {
                conversation_id,
                sender_id,
                content: content.to_string(),
            })
            .await?;

        metrics::record_message_sent();
        tracing::debug!(
            message_id = %message.id,
            conversation_id = %conversation_id,
            sequence_number = message.sequence_number,
            "message appended"
        );
        self.feed.publish(ChangeKind::Insert, &message).await;

        // The message is durable either way; a stale last-activity only
        // affects list ordering.
        if let Err(e) = self
            .conversations
            .touch(conversation_id, message.created_at)
            .await
        {
            tracing::warn!(conversation_id = %conversation_id, error = %e, "failed to bump last activity");
        }

        Ok(message)
    }

    /// Ascending display order. `NotFound` for unknown conversations.
    pub async fn list_ordered(&self, conversation_id: Uuid) -> AppResult<Vec<Message>> {
        if self.conversations.find(conversation_id).await?.is_none() {
            return Err(AppError::not_found(format!("conversation {conversation_id}")));
        }
        self.repo.list_by_conversation(conversation_id).await
    }

    /// Sender only. A missing message (including one already deleted) is
    /// `NotFound`.
    pub async fn delete(&self, message_id: Uuid, caller_id: Uuid) -> AppResult<Message> {
        let message = self
            .repo
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("message {message_id}")))?;
        if message.sender_id != caller_id {
            return Err(AppError::Forbidden);
        }

        let removed = self
            .repo
            .delete(message_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("message {message_id}")))?;

        metrics::record_message_deleted();
        tracing::debug!(
            message_id = %message_id,
            conversation_id = %removed.conversation_id,
            "message deleted"
        );
        self.feed.publish(ChangeKind::Delete, &removed).await;
        Ok(removed)
    }

    pub async fn find(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        self.repo.find_by_id(message_id).await
    }

    pub async fn latest(&self, conversation_id: Uuid) -> AppResult<Option<Message>> {
        self.repo.latest(conversation_id).await
    }
}
