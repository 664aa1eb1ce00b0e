//! End-to-end buyer/seller flows across sessions, the unread view and
//! notifications.

mod common;

use common::{eventually, Harness, LISTING};
use marketplace_chat_service::error::AppError;
use marketplace_chat_service::models::NotificationKind;
use marketplace_chat_service::session::{ChatSession, OpenTarget, UnreadAggregator};

#[tokio::test]
async fn buyer_contacts_seller_and_gets_a_reply() {
    let h = Harness::new().await;
    let (u1, u2) = (h.buyer, h.seller);

    let u1_unread = UnreadAggregator::start(h.services.clone(), h.provider(u1))
        .await
        .unwrap();
    let u2_unread = UnreadAggregator::start(h.services.clone(), h.provider(u2))
        .await
        .unwrap();

    // first contact creates the conversation
    let u1_chat = ChatSession::open(h.services.clone(), h.provider(u1), OpenTarget::Listing(LISTING))
        .await
        .unwrap();
    let c1 = u1_chat.conversation_id();
    u1_chat.send("Is this available?").await.unwrap();

    let u2_notifications = h.services.notifications.unread(u2).await.unwrap();
    let about_message: Vec<_> = u2_notifications
        .iter()
        .filter(|n| n.kind == NotificationKind::Message && n.content.starts_with("New message"))
        .collect();
    assert_eq!(about_message.len(), 1);
    assert_eq!(about_message[0].related_conversation(), Some(c1));
    assert!(eventually(|| async { u2_unread.is_unread(c1).await }).await);

    // U2 opens C1 and replies
    let u2_chat = ChatSession::open(h.services.clone(), h.provider(u2), OpenTarget::Existing(c1))
        .await
        .unwrap();
    u2_unread.mark_conversation_opened(c1).await;
    assert!(!u2_unread.is_unread(c1).await);
    assert_eq!(u2_chat.messages().await.len(), 1);

    let u1_badge_before = u1_unread.badge_count().await;
    let reply = u2_chat.send("Yes!").await.unwrap();

    assert!(eventually(|| async { u1_unread.badge_count().await == u1_badge_before + 1 }).await);
    assert!(
        eventually(|| async {
            u1_unread
                .conversations()
                .await
                .iter()
                .find(|s| s.conversation.id == c1)
                .and_then(|s| s.latest.as_ref())
                .is_some_and(|m| m.id == reply.id)
        })
        .await
    );
    assert!(u1_unread.is_unread(c1).await);
    assert!(eventually(|| async { u1_chat.messages().await.len() == 2 }).await);

    for chat in [&u1_chat, &u2_chat] {
        chat.close().await;
    }
    u1_unread.close().await;
    u2_unread.close().await;
}

#[tokio::test]
async fn deleting_a_conversation_removes_it_everywhere() {
    let h = Harness::new().await;
    let (u1, u2) = (h.buyer, h.seller);
    let c1 = h.conversation().await.id;
    h.services.send_message(c1, u1, "hello").await.unwrap();

    let u1_unread = UnreadAggregator::start(h.services.clone(), h.provider(u1))
        .await
        .unwrap();
    let u2_unread = UnreadAggregator::start(h.services.clone(), h.provider(u2))
        .await
        .unwrap();
    assert_eq!(u1_unread.conversations().await.len(), 1);
    assert_eq!(u2_unread.conversations().await.len(), 1);

    h.services.conversations.delete(c1, u1).await.unwrap();

    assert!(eventually(|| async { u1_unread.conversations().await.is_empty() }).await);
    assert!(eventually(|| async { u2_unread.conversations().await.is_empty() }).await);
    assert!(h.services.conversations.list_for_user(u1).await.unwrap().is_empty());
    assert!(h.services.conversations.list_for_user(u2).await.unwrap().is_empty());

    let fetched = h.services.conversations.open_existing(c1, u2).await;
    assert!(matches!(fetched, Err(AppError::NotFound(_))));
    let history = h.services.messages.list_ordered(c1).await;
    assert!(matches!(history, Err(AppError::NotFound(_))));

    u1_unread.close().await;
    u2_unread.close().await;
}
