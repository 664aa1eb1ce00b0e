//! Row-change envelope and the validating decode step.
//!
//! Rows travel through the feed (and across instances) as untyped JSON.
//! Subscribers never see that JSON: every delivery goes through
//! [`decode`], which checks the table, deserializes and runs the entity's
//! own validation.

use crate::models::{Conversation, Message, Notification};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Conversations,
    Messages,
    Notifications,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Conversations => "conversations",
            Table::Messages => "messages",
            Table::Notifications => "notifications",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One committed row change. For deletes `record` holds the removed row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowChange {
    pub table: Table,
    pub kind: ChangeKind,
    pub record: Value,
    /// Instance that committed the change
    pub origin: Uuid,
    pub committed_at: DateTime<Utc>,
}

/// Table plus optional single-column equality
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub table: Table,
    pub column: Option<(String, Value)>,
}

impl Filter {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            column: None,
        }
    }

    pub fn eq(mut self, column: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.column = Some((column.to_string(), value));
        self
    }

    pub fn matches(&self, change: &RowChange) -> bool {
        if change.table != self.table {
            return false;
        }
        match &self.column {
            None => true,
            Some((column, expected)) => change.record.get(column) == Some(expected),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("expected a {expected} row, got {actual}")]
    WrongTable { expected: Table, actual: Table },

    #[error("malformed row: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid row: {0}")]
    Invalid(String),
}

/// Typed entity that can arrive through the change feed.
pub trait ChangeRecord: DeserializeOwned + Serialize + Send + Sync + 'static {
    const TABLE: Table;

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

impl ChangeRecord for Conversation {
    const TABLE: Table = Table::Conversations;

    fn validate(&self) -> Result<(), String> {
        if self.buyer_id == self.seller_id {
            return Err("buyer and seller are the same user".into());
        }
        Ok(())
    }
}

impl ChangeRecord for Message {
    const TABLE: Table = Table::Messages;

    fn validate(&self) -> Result<(), String> {
        if self.sequence_number < 1 {
            return Err(format!("bad sequence number {}", self.sequence_number));
        }
        Ok(())
    }
}

impl ChangeRecord for Notification {
    const TABLE: Table = Table::Notifications;

    fn validate(&self) -> Result<(), String> {
        if self.content.trim().is_empty() {
            return Err("empty notification content".into());
        }
        Ok(())
    }
}

pub fn decode<T: ChangeRecord>(change: &RowChange) -> Result<T, DecodeError> {
    if change.table != T::TABLE {
        return Err(DecodeError::WrongTable {
            expected: T::TABLE,
            actual: change.table,
        });
    }
    let record: T = serde_json::from_value(change.record.clone())?;
    record.validate().map_err(DecodeError::Invalid)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(table: Table, record: Value) -> RowChange {
        RowChange {
            table,
            kind: ChangeKind::Insert,
            record,
            origin: Uuid::nil(),
            committed_at: Utc::now(),
        }
    }

    fn message_json(conversation_id: Uuid) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "conversation_id": conversation_id,
            "sender_id": Uuid::new_v4(),
            "content": "still available?",
            "sequence_number": 1,
            "created_at": Utc::now(),
        })
    }

    #[test]
    fn filter_matches_on_column_value() {
        let conv = Uuid::new_v4();
        let filter = Filter::table(Table::Messages).eq("conversation_id", conv);

        assert!(filter.matches(&change(Table::Messages, message_json(conv))));
        assert!(!filter.matches(&change(Table::Messages, message_json(Uuid::new_v4()))));
        assert!(!filter.matches(&change(Table::Notifications, message_json(conv))));
        assert!(Filter::table(Table::Messages).matches(&change(Table::Messages, json!({}))));
    }

    #[test]
    fn decode_accepts_well_formed_rows() {
        let conv = Uuid::new_v4();
        let msg: Message = decode(&change(Table::Messages, message_json(conv))).unwrap();
        assert_eq!(msg.conversation_id, conv);
    }

    #[test]
    fn decode_rejects_garbage_without_panicking() {
        let err = decode::<Message>(&change(Table::Messages, json!({"id": 5}))).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));

        let err =
            decode::<Message>(&change(Table::Conversations, message_json(Uuid::nil()))).unwrap_err();
        assert!(matches!(err, DecodeError::WrongTable { .. }));

        let mut bad = message_json(Uuid::nil());
        bad["sequence_number"] = json!(0);
        let err = decode::<Message>(&change(Table::Messages, bad)).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid(_)));
    }

    #[test]
    fn notification_kind_decodes_from_type_column() {
        let row = json!({
            "id": Uuid::new_v4(),
            "recipient_id": Uuid::new_v4(),
            "content": "Price dropped",
            "type": "price_drop",
            "related_id": "12",
            "is_read": false,
            "created_at": Utc::now(),
        });
        let n: Notification = decode(&change(Table::Notifications, row)).unwrap();
        assert_eq!(n.kind, crate::models::NotificationKind::PriceDrop);
    }
}
