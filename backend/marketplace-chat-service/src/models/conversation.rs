use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Listings are owned by the external listing service and keyed by integer id.
pub type ListingId = i64;

/// Buyer/seller thread about one listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub listing_id: ListingId,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Last activity; bumped on every new message.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    /// The participant who is not `user_id`, if `user_id` takes part at all.
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        if self.buyer_id == user_id {
            Some(self.seller_id)
        } else if self.seller_id == user_id {
            Some(self.buyer_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub listing_id: ListingId,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
}

impl NewConversation {
    pub fn into_conversation(self, now: DateTime<Utc>) -> Conversation {
        Conversation {
            id: Uuid::new_v4(),
            listing_id: self.listing_id,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            created_at: now,
            updated_at: now,
        }
    }
}
