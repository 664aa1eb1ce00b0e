use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{NewNotification, Notification, NotificationKind};
use crate::realtime::{ChangeFeed, ChangeHandler, ChangeKind, Filter, Subscription, Table};
use crate::repository::{MarkReadOutcome, NotificationRepository};
use crate::services::profile_directory::ProfileDirectory;
use std::sync::Arc;
use uuid::Uuid;

pub const MAX_PAGE_SIZE: i64 = 100;

/// Durable per-user notification log with read state.
#[derive(Clone)]
pub struct NotificationCenter {
    repo: Arc<dyn NotificationRepository>,
    profiles: Arc<dyn ProfileDirectory>,
    feed: ChangeFeed,
}

impl NotificationCenter {
    pub fn new(
        repo: Arc<dyn NotificationRepository>,
        profiles: Arc<dyn ProfileDirectory>,
        feed: ChangeFeed,
    ) -> Self {
        Self {
            repo,
            profiles,
            feed,
        }
    }

    pub async fn create(
        &self,
        recipient_id: Uuid,
        content: &str,
        kind: NotificationKind,
        related_id: Option<String>,
    ) -> AppResult<Notification> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::invalid("notification content is empty"));
        }
        if !self.profiles.user_exists(recipient_id).await? {
            return Err(AppError::not_found(format!("user {recipient_id}")));
        }

        let notification = self
            .repo
            .insert(NewNotification {
                recipient_id,
                content: content.to_string(),
                kind,
                related_id,
            })
            .await?;

        metrics::record_notification_created(kind.as_str());
        tracing::debug!(
            notification_id = %notification.id,
            recipient_id = %recipient_id,
            kind = %kind,
            "notification created"
        );
        self.feed.publish(ChangeKind::Insert, &notification).await;
        Ok(notification)
    }

    /// Newest first; `limit` is clamped to `1..=100`.
    pub async fn fetch_recent(&self, user_id: Uuid, limit: i64) -> AppResult<Vec<Notification>> {
        self.repo
            .list_recent(user_id, limit.clamp(1, MAX_PAGE_SIZE))
            .await
    }

    /// Idempotent. Returns whether this call flipped the flag.
    pub async fn mark_read(&self, notification_id: Uuid, caller_id: Uuid) -> AppResult<bool> {
        let notification = self
            .repo
            .find_by_id(notification_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("notification {notification_id}")))?;

        if notification.recipient_id != caller_id {
            tracing::warn!(
                notification_id = %notification_id,
                caller_id = %caller_id,
                "mark_read by non-recipient rejected"
            );
            return Err(AppError::Forbidden);
        }
        if notification.is_read {
            return Ok(false);
        }

        match self.repo.mark_read(notification_id).await? {
            MarkReadOutcome::Transitioned(updated) => {
                self.feed.publish(ChangeKind::Update, &updated).await;
                Ok(true)
            }
            MarkReadOutcome::AlreadyRead => Ok(false),
            MarkReadOutcome::Missing => {
                Err(AppError::not_found(format!("notification {notification_id}")))
            }
        }
    }

    /// Returns how many notifications transitioned.
    pub async fn mark_all_read(&self, user_id: Uuid) -> AppResult<usize> {
        let updated = self.repo.mark_all_read(user_id).await?;
        for notification in &updated {
            self.feed.publish(ChangeKind::Update, notification).await;
        }
        if !updated.is_empty() {
            tracing::debug!(user_id = %user_id, count = updated.len(), "marked all read");
        }
        Ok(updated.len())
    }

    pub async fn unread_count(&self, user_id: Uuid) -> AppResult<i64> {
        self.repo.count_unread(user_id).await
    }

    pub async fn unread(&self, user_id: Uuid) -> AppResult<Vec<Notification>> {
        self.repo.list_unread(user_id).await
    }

    /// Live inserts and read transitions for `user_id`.
    pub async fn subscribe<H>(&self, user_id: Uuid, handler: H) -> Subscription
    where
        H: ChangeHandler<Notification>,
    {
        self.feed
            .subscribe(
                Filter::table(Table::Notifications).eq("recipient_id", user_id),
                handler,
            )
            .await
    }
}
