use super::conversation::ListingId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Notification category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// New chat message or a buyer starting a conversation
    Message,
    PriceDrop,
    Wishlist,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Message => "message",
            NotificationKind::PriceDrop => "price_drop",
            NotificationKind::Wishlist => "wishlist",
            NotificationKind::System => "system",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(NotificationKind::Message),
            "price_drop" => Ok(NotificationKind::PriceDrop),
            "wishlist" => Ok(NotificationKind::Wishlist),
            "system" => Ok(NotificationKind::System),
            other => Err(format!("unknown notification kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Weak reference (conversation id, listing id, ...). May dangle.
    pub related_id: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Where the UI goes when a notification is clicked
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum NavigationTarget {
    Conversation { conversation_id: Uuid },
    Listing { listing_id: ListingId },
    Account,
}

impl Notification {
    /// The referenced conversation, if this is a message notification with a
    /// well-formed id. Malformed references yield `None`.
    pub fn related_conversation(&self) -> Option<Uuid> {
        if self.kind != NotificationKind::Message {
            return None;
        }
        self.related_id
            .as_deref()
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
    }

    pub fn navigation_target(&self) -> NavigationTarget {
        match self.kind {
            NotificationKind::Message => match self.related_conversation() {
                Some(conversation_id) => NavigationTarget::Conversation { conversation_id },
                None => NavigationTarget::Account,
            },
            NotificationKind::PriceDrop | NotificationKind::Wishlist => {
                match self
                    .related_id
                    .as_deref()
                    .and_then(|raw| raw.trim().parse::<ListingId>().ok())
                {
                    Some(listing_id) => NavigationTarget::Listing { listing_id },
                    None => NavigationTarget::Account,
                }
            }
            NotificationKind::System => NavigationTarget::Account,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: Uuid,
    pub content: String,
    pub kind: NotificationKind,
    pub related_id: Option<String>,
}

impl NewNotification {
    pub fn into_notification(self, now: DateTime<Utc>) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            recipient_id: self.recipient_id,
            content: self.content,
            kind: self.kind,
            related_id: self.related_id,
            is_read: false,
            created_at: now,
        }
    }
}
