//! Storage seams. Services depend on these traits only; the binary picks the
//! Postgres implementation, tests and `STORAGE_BACKEND=memory` use the
//! in-process one.

pub mod memory;
pub mod postgres;

use crate::error::AppResult;
use crate::models::{
    Conversation, ListingId, Message, NewConversation, NewMessage, NewNotification, Notification,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_participants(
        &self,
        listing_id: ListingId,
        buyer_id: Uuid,
        seller_id: Uuid,
    ) -> AppResult<Option<Conversation>>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Conversation>>;

    /// Insert guarded by the (listing, buyer, seller) uniqueness constraint.
    /// `None` means another writer created the row first.
    async fn insert(&self, new: NewConversation) -> AppResult<Option<Conversation>>;

    /// Move last activity forward to `at`. Never moves it backwards.
    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Conversation>>;

    /// Remove the conversation row. `false` when nothing was deleted.
    async fn delete(&self, id: Uuid) -> AppResult<bool>;

    /// Conversations the user takes part in, most recent activity first.
    async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Conversation>>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persist and assign the next sequence number of the conversation.
    async fn insert(&self, new: NewMessage) -> AppResult<Message>;

    /// Ascending by (created_at, sequence_number, id).
    async fn list_by_conversation(&self, conversation_id: Uuid) -> AppResult<Vec<Message>>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Message>>;

    /// Returns the removed row.
    async fn delete(&self, id: Uuid) -> AppResult<Option<Message>>;

    async fn delete_by_conversation(&self, conversation_id: Uuid) -> AppResult<u64>;

    async fn latest(&self, conversation_id: Uuid) -> AppResult<Option<Message>>;
}

/// Result of a single read transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkReadOutcome {
    Transitioned(Notification),
    AlreadyRead,
    Missing,
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert(&self, new: NewNotification) -> AppResult<Notification>;

    /// Newest first.
    async fn list_recent(&self, recipient_id: Uuid, limit: i64) -> AppResult<Vec<Notification>>;

    async fn list_unread(&self, recipient_id: Uuid) -> AppResult<Vec<Notification>>;

    async fn count_unread(&self, recipient_id: Uuid) -> AppResult<i64>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Notification>>;

    async fn mark_read(&self, id: Uuid) -> AppResult<MarkReadOutcome>;

    /// Rows that actually flipped from unread to read.
    async fn mark_all_read(&self, recipient_id: Uuid) -> AppResult<Vec<Notification>>;
}
