pub mod conversation_service;
pub mod identity;
pub mod listing_directory;
pub mod message_service;
pub mod notification_service;
pub mod profile_directory;

pub use conversation_service::ConversationDirectory;
pub use identity::{AuthMetadata, IdentityProvider, SessionIdentity, TokenMetadataCache};
pub use listing_directory::{
    InMemoryListingDirectory, ListingDirectory, ListingSummary, PgListingDirectory,
};
pub use message_service::MessageStore;
pub use notification_service::NotificationCenter;
pub use profile_directory::{
    DisplayNameResolver, InMemoryProfileDirectory, PgProfileDirectory, ProfileDirectory,
};

use crate::models::{Conversation, Message, NotificationKind};
use crate::models::message::preview;

/// Notification text for a new chat message.
pub fn message_notification_content(sender_name: &str, content: &str, preview_chars: usize) -> String {
    format!("New message from {sender_name}: {}", preview(content, preview_chars))
}

/// Notify the other participant about `message`. Failures are logged only.
pub async fn notify_recipient(
    notifications: &NotificationCenter,
    names: &DisplayNameResolver,
    conversation: &Conversation,
    message: &Message,
    preview_chars: usize,
) {
    let Some(recipient) = conversation.other_participant(message.sender_id) else {
        return;
    };
    let sender_name = names.resolve_display_name(message.sender_id).await;
    let content = message_notification_content(&sender_name, &message.content, preview_chars);

    if let Err(e) = notifications
        .create(
            recipient,
            &content,
            NotificationKind::Message,
            Some(conversation.id.to_string()),
        )
        .await
    {
        tracing::warn!(
            conversation_id = %conversation.id,
            recipient_id = %recipient,
            error = %e,
            "failed to create message notification"
        );
    }
}
