use super::{ConversationRepository, MarkReadOutcome, MessageRepository, NotificationRepository};
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ListingId, Message, NewConversation, NewMessage, NewNotification, Notification,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    conversations: HashMap<Uuid, Conversation>,
    messages: HashMap<Uuid, Message>,
    counters: HashMap<Uuid, i64>,
    notifications: HashMap<Uuid, Notification>,
}

/// Process-local store with the same constraints as the SQL schema:
/// unique conversation triples, per-conversation sequence counters and
/// message cascade on conversation delete.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn message_count(&self, conversation_id: Uuid) -> usize {
        let guard = self.inner.read().await;
        guard
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .count()
    }
}

fn sorted_messages<'a>(iter: impl Iterator<Item = &'a Message>) -> Vec<Message> {
    let mut out: Vec<Message> = iter.cloned().collect();
    out.sort_by(|a, b| a.display_cmp(b));
    out
}

#[async_trait]
impl ConversationRepository for InMemoryStore {
    async fn find_by_participants(
        &self,
        listing_id: ListingId,
        buyer_id: Uuid,
        seller_id: Uuid,
    ) -> AppResult<Option<Conversation>> {
        let guard = self.inner.read().await;
        Ok(guard
            .conversations
            .values()
            .find(|c| {
                c.listing_id == listing_id && c.buyer_id == buyer_id && c.seller_id == seller_id
            })
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        Ok(self.inner.read().await.conversations.get(&id).cloned())
    }

    async fn insert(&self, new: NewConversation) -> AppResult<Option<Conversation>> {
        let mut guard = self.inner.write().await;
        let exists = guard.conversations.values().any(|c| {
            c.listing_id == new.listing_id
                && c.buyer_id == new.buyer_id
                && c.seller_id == new.seller_id
        });
        if exists {
            return Ok(None);
        }
        let conversation = new.into_conversation(Utc::now());
        guard
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(Some(conversation))
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Conversation>> {
        let mut guard = self.inner.write().await;
        Ok(guard.conversations.get_mut(&id).map(|c| {
            if at > c.updated_at {
                c.updated_at = at;
            }
            c.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        let mut guard = self.inner.write().await;
        let removed = guard.conversations.remove(&id).is_some();
        if removed {
            guard.messages.retain(|_, m| m.conversation_id != id);
            guard.counters.remove(&id);
        }
        Ok(removed)
    }

    async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Conversation>> {
        let guard = self.inner.read().await;
        let mut out: Vec<Conversation> = guard
            .conversations
            .values()
            .filter(|c| c.is_participant(user_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn insert(&self, new: NewMessage) -> AppResult<Message> {
        let mut guard = self.inner.write().await;
        if !guard.conversations.contains_key(&new.conversation_id) {
            return Err(AppError::not_found("conversation"));
        }
        let seq = guard.counters.entry(new.conversation_id).or_insert(0);
        *seq += 1;
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            content: new.content,
            sequence_number: *seq,
            created_at: Utc::now(),
        };
        guard.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn list_by_conversation(&self, conversation_id: Uuid) -> AppResult<Vec<Message>> {
        let guard = self.inner.read().await;
        Ok(sorted_messages(
            guard
                .messages
                .values()
                .filter(|m| m.conversation_id == conversation_id),
        ))
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.inner.read().await.messages.get(&id).cloned())
    }

    async fn delete(&self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.inner.write().await.messages.remove(&id))
    }

    async fn delete_by_conversation(&self, conversation_id: Uuid) -> AppResult<u64> {
        let mut guard = self.inner.write().await;
        let before = guard.messages.len();
        guard
            .messages
            .retain(|_, m| m.conversation_id != conversation_id);
        Ok((before - guard.messages.len()) as u64)
    }

    async fn latest(&self, conversation_id: Uuid) -> AppResult<Option<Message>> {
        let guard = self.inner.read().await;
        Ok(guard
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .max_by(|a, b| a.display_cmp(b))
            .cloned())
    }
}

#[async_trait]
impl NotificationRepository for InMemoryStore {
    async fn insert(&self, new: NewNotification) -> AppResult<Notification> {
        let notification = new.into_notification(Utc::now());
        self.inner
            .write()
            .await
            .notifications
            .insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn list_recent(&self, recipient_id: Uuid, limit: i64) -> AppResult<Vec<Notification>> {
        let guard = self.inner.read().await;
        let mut out: Vec<Notification> = guard
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn list_unread(&self, recipient_id: Uuid) -> AppResult<Vec<Notification>> {
        let guard = self.inner.read().await;
        let mut out: Vec<Notification> = guard
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id && !n.is_read)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn count_unread(&self, recipient_id: Uuid) -> AppResult<i64> {
        let guard = self.inner.read().await;
        Ok(guard
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id && !n.is_read)
            .count() as i64)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Notification>> {
        Ok(self.inner.read().await.notifications.get(&id).cloned())
    }

    async fn mark_read(&self, id: Uuid) -> AppResult<MarkReadOutcome> {
        let mut guard = self.inner.write().await;
        Ok(match guard.notifications.get_mut(&id) {
            None => MarkReadOutcome::Missing,
            Some(n) if n.is_read => MarkReadOutcome::AlreadyRead,
            Some(n) => {
                n.is_read = true;
                MarkReadOutcome::Transitioned(n.clone())
            }
        })
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> AppResult<Vec<Notification>> {
        let mut guard = self.inner.write().await;
        Ok(guard
            .notifications
            .values_mut()
            .filter(|n| n.recipient_id == recipient_id && !n.is_read)
            .map(|n| {
                n.is_read = true;
                n.clone()
            })
            .collect())
    }
}
