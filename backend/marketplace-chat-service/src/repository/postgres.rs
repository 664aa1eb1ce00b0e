use super::{ConversationRepository, MarkReadOutcome, MessageRepository, NotificationRepository};
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ListingId, Message, NewConversation, NewMessage, NewNotification, Notification,
    NotificationKind,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

const CONVERSATION_COLUMNS: &str = "id, listing_id, buyer_id, seller_id, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, sequence_number, created_at";
const NOTIFICATION_COLUMNS: &str =
    "id, recipient_id, content, type, related_id, is_read, created_at";

// Postgres foreign_key_violation
const FK_VIOLATION: &str = "23503";

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }
}

fn conversation_from_row(row: &PgRow) -> Result<Conversation, sqlx::Error> {
    Ok(Conversation {
        id: row.try_get("id")?,
        listing_id: row.try_get("listing_id")?,
        buyer_id: row.try_get("buyer_id")?,
        seller_id: row.try_get("seller_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn message_from_row(row: &PgRow) -> Result<Message, sqlx::Error> {
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        content: row.try_get("content")?,
        sequence_number: row.try_get("sequence_number")?,
        created_at: row.try_get("created_at")?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<Notification, sqlx::Error> {
    let kind: String = row.try_get("type")?;
    let kind = kind
        .parse::<NotificationKind>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;
    Ok(Notification {
        id: row.try_get("id")?,
        recipient_id: row.try_get("recipient_id")?,
        content: row.try_get("content")?,
        kind,
        related_id: row.try_get("related_id")?,
        is_read: row.try_get("is_read")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ConversationRepository for PgStore {
    async fn find_by_participants(
        &self,
        listing_id: ListingId,
        buyer_id: Uuid,
        seller_id: Uuid,
    ) -> AppResult<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE listing_id = $1 AND buyer_id = $2 AND seller_id = $3"
        ))
        .bind(listing_id)
        .bind(buyer_id)
        .bind(seller_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.as_ref().map(conversation_from_row).transpose()?)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.as_ref().map(conversation_from_row).transpose()?)
    }

    async fn insert(&self, new: NewConversation) -> AppResult<Option<Conversation>> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO conversations (id, listing_id, buyer_id, seller_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (listing_id, buyer_id, seller_id) DO NOTHING
            RETURNING {CONVERSATION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.listing_id)
        .bind(new.buyer_id)
        .bind(new.seller_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.as_ref().map(conversation_from_row).transpose()?)
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "UPDATE conversations SET updated_at = GREATEST(updated_at, $2) \
             WHERE id = $1 RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.as_ref().map(conversation_from_row).transpose()?)
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Conversation>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE buyer_id = $1 OR seller_id = $1 \
             ORDER BY updated_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter()
            .map(conversation_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(AppError::from)
    }
}

#[async_trait]
impl MessageRepository for PgStore {
    async fn insert(&self, new: NewMessage) -> AppResult<Message> {
        let result = sqlx::query(&format!(
            r#"
            WITH next AS (
                INSERT INTO conversation_counters (conversation_id, last_seq)
                VALUES ($2, 1)
                ON CONFLICT (conversation_id)
                DO UPDATE SET last_seq = conversation_counters.last_seq + 1
                RETURNING last_seq
            )
            INSERT INTO messages (id, conversation_id, sender_id, content, sequence_number)
            SELECT $1, $2, $3, $4, next.last_seq
            FROM next
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.conversation_id)
        .bind(new.sender_id)
        .bind(&new.content)
        .fetch_one(&self.db)
        .await;

        match result {
            Ok(row) => Ok(message_from_row(&row)?),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some(FK_VIOLATION) => {
                Err(AppError::not_found("conversation"))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_by_conversation(&self, conversation_id: Uuid) -> AppResult<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 \
             ORDER BY created_at ASC, sequence_number ASC, id ASC"
        ))
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(AppError::from)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Message>> {
        let row = sqlx::query(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.as_ref().map(message_from_row).transpose()?)
    }

    async fn delete(&self, id: Uuid) -> AppResult<Option<Message>> {
        let row = sqlx::query(&format!(
            "DELETE FROM messages WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.as_ref().map(message_from_row).transpose()?)
    }

    async fn delete_by_conversation(&self, conversation_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE conversation_id = $1")
            .bind(conversation_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn latest(&self, conversation_id: Uuid) -> AppResult<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 \
             ORDER BY created_at DESC, sequence_number DESC, id DESC LIMIT 1"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.as_ref().map(message_from_row).transpose()?)
    }
}

#[async_trait]
impl NotificationRepository for PgStore {
    async fn insert(&self, new: NewNotification) -> AppResult<Notification> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO notifications (id, recipient_id, content, type, related_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.recipient_id)
        .bind(&new.content)
        .bind(new.kind.as_str())
        .bind(&new.related_id)
        .fetch_one(&self.db)
        .await?;
        Ok(notification_from_row(&row)?)
    }

    async fn list_recent(&self, recipient_id: Uuid, limit: i64) -> AppResult<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE recipient_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2"
        ))
        .bind(recipient_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        rows.iter()
            .map(notification_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(AppError::from)
    }

    async fn list_unread(&self, recipient_id: Uuid) -> AppResult<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE recipient_id = $1 AND is_read = FALSE ORDER BY created_at DESC"
        ))
        .bind(recipient_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter()
            .map(notification_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(AppError::from)
    }

    async fn count_unread(&self, recipient_id: Uuid) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND is_read = FALSE",
        )
        .bind(recipient_id)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Notification>> {
        let row = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.as_ref().map(notification_from_row).transpose()?)
    }

    async fn mark_read(&self, id: Uuid) -> AppResult<MarkReadOutcome> {
        // Only the writer that flips the flag gets a row back.
        let row = sqlx::query(&format!(
            "UPDATE notifications SET is_read = TRUE \
             WHERE id = $1 AND is_read = FALSE RETURNING {NOTIFICATION_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        if let Some(row) = row {
            return Ok(MarkReadOutcome::Transitioned(notification_from_row(&row)?));
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM notifications WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.db)
                .await?;
        Ok(if exists {
            MarkReadOutcome::AlreadyRead
        } else {
            MarkReadOutcome::Missing
        })
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> AppResult<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "UPDATE notifications SET is_read = TRUE \
             WHERE recipient_id = $1 AND is_read = FALSE RETURNING {NOTIFICATION_COLUMNS}"
        ))
        .bind(recipient_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter()
            .map(notification_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(AppError::from)
    }
}
