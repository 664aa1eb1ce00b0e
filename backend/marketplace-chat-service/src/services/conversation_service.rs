use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{Conversation, ListingId, NewConversation, NotificationKind};
use crate::realtime::{ChangeFeed, ChangeKind};
use crate::repository::{ConversationRepository, MessageRepository};
use crate::services::listing_directory::ListingDirectory;
use crate::services::notification_service::NotificationCenter;
use crate::services::profile_directory::DisplayNameResolver;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Owns conversation rows: one per (listing, buyer, seller).
#[derive(Clone)]
pub struct ConversationDirectory {
    repo: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    listings: Arc<dyn ListingDirectory>,
    notifications: NotificationCenter,
    names: DisplayNameResolver,
    feed: ChangeFeed,
}

impl ConversationDirectory {
    pub fn new(
        repo: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        listings: Arc<dyn ListingDirectory>,
        notifications: NotificationCenter,
        names: DisplayNameResolver,
        feed: ChangeFeed,
    ) -> Self {
        Self {
            repo,
            messages,
            listings,
            notifications,
            names,
            feed,
        }
    }

    /// Existing conversation for (listing, buyer, seller) or a new one.
    /// Concurrent callers converge on the same row; only the creator
    /// notifies the seller.
    pub async fn resolve_or_create(
        &self,
        listing_id: ListingId,
        buyer_id: Uuid,
    ) -> AppResult<Conversation> {
        let listing = self.listings.listing(listing_id).await?;
        if listing.seller_id == buyer_id {
            return Err(AppError::invalid("cannot start a conversation on your own listing"));
        }

        if let Some(existing) = self
            .repo
            .find_by_participants(listing_id, buyer_id, listing.seller_id)
            .await?
        {
            return Ok(existing);
        }

        let inserted = self
            .repo
            .insert(NewConversation {
                listing_id,
                buyer_id,
                seller_id: listing.seller_id,
            })
            .await?;

        let Some(conversation) = inserted else {
            tracing::debug!(
                listing_id,
                buyer_id = %buyer_id,
                "lost conversation create race, re-reading winner"
            );
            return self
                .repo
                .find_by_participants(listing_id, buyer_id, listing.seller_id)
                .await?
                .ok_or_else(|| {
                    AppError::Transient("conversation changed concurrently, retry".into())
                });
        };

        metrics::record_conversation_created();
        tracing::info!(
            conversation_id = %conversation.id,
            listing_id,
            buyer_id = %buyer_id,
            seller_id = %conversation.seller_id,
            "conversation created"
        );
        self.feed.publish(ChangeKind::Insert, &conversation).await;

        let buyer_name = self.names.resolve_display_name(buyer_id).await;
        let content = if listing.title.is_empty() {
            format!("{buyer_name} is interested in your listing")
        } else {
            format!("{buyer_name} is interested in \"{}\"", listing.title)
        };
        if let Err(e) = self
            .notifications
            .create(
                conversation.seller_id,
                &content,
                NotificationKind::Message,
                Some(conversation.id.to_string()),
            )
            .await
        {
            tracing::warn!(
                conversation_id = %conversation.id,
                error = %e,
                "failed to notify seller about new conversation"
            );
        }

        Ok(conversation)
    }

    pub async fn open_existing(
        &self,
        conversation_id: Uuid,
        caller_id: Uuid,
    ) -> AppResult<Conversation> {
        let conversation = self
            .repo
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("conversation {conversation_id}")))?;
        if !conversation.is_participant(caller_id) {
            return Err(AppError::Forbidden);
        }
        Ok(conversation)
    }

    /// Existence check without the participant rule.
    pub async fn find(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>> {
        self.repo.find_by_id(conversation_id).await
    }

    /// Messages first, then the row. A surviving row after messages were
    /// removed is reported as `PartialDelete`.
    pub async fn delete(&self, conversation_id: Uuid, caller_id: Uuid) -> AppResult<()> {
        let conversation = self.open_existing(conversation_id, caller_id).await?;

        let messages_deleted = self.messages.delete_by_conversation(conversation_id).await?;

        let removed = match self.repo.delete(conversation_id).await {
            Ok(removed) => removed,
            Err(e) if messages_deleted > 0 => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    messages_deleted,
                    error = %e,
                    "conversation row survived message deletion"
                );
                return Err(AppError::PartialDelete {
                    conversation_id,
                    messages_deleted,
                });
            }
            Err(e) => return Err(e),
        };

        if removed {
            tracing::info!(
                conversation_id = %conversation_id,
                caller_id = %caller_id,
                messages_deleted,
                "conversation deleted"
            );
            self.feed.publish(ChangeKind::Delete, &conversation).await;
        }
        Ok(())
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Conversation>> {
        self.repo.list_for_user(user_id).await
    }

    pub async fn touch(&self, conversation_id: Uuid, at: DateTime<Utc>) -> AppResult<Conversation> {
        let conversation = self
            .repo
            .touch(conversation_id, at)
            .await?
            .ok_or_else(|| AppError::not_found(format!("conversation {conversation_id}")))?;
        self.feed.publish(ChangeKind::Update, &conversation).await;
        Ok(conversation)
    }
}
