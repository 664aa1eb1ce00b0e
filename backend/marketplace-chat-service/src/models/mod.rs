pub mod conversation;
pub mod message;
pub mod notification;

pub use conversation::{Conversation, ListingId, NewConversation};
pub use message::{Message, NewMessage};
pub use notification::{NavigationTarget, NewNotification, Notification, NotificationKind};
