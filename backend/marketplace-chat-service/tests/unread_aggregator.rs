mod common;

use common::{eventually, Harness};
use marketplace_chat_service::error::AppError;
use marketplace_chat_service::models::NotificationKind;
use marketplace_chat_service::realtime::Table;
use marketplace_chat_service::services::SessionIdentity;
use marketplace_chat_service::session::UnreadAggregator;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn requires_a_signed_in_viewer() {
    let h = Harness::new().await;
    let result = UnreadAggregator::start(h.services.clone(), Arc::new(SessionIdentity::new())).await;
    assert!(matches!(result.err(), Some(AppError::Unauthorized)));
}

#[tokio::test]
async fn seeds_from_storage() {
    let h = Harness::new().await;
    let conversation = h.conversation().await;
    h.services
        .send_message(conversation.id, h.buyer, "hello")
        .await
        .unwrap();

    let seller = UnreadAggregator::start(h.services.clone(), h.provider(h.seller))
        .await
        .unwrap();

    let list = seller.conversations().await;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].conversation.id, conversation.id);
    assert_eq!(list[0].latest.as_ref().map(|m| m.content.as_str()), Some("hello"));
    assert!(list[0].unread);
    // interest notice plus the message notice
    assert_eq!(seller.badge_count().await, 2);
    seller.close().await;
}

#[tokio::test]
async fn new_conversations_and_messages_arrive_live() {
    let h = Harness::new().await;
    let seller = UnreadAggregator::start(h.services.clone(), h.provider(h.seller))
        .await
        .unwrap();
    assert!(seller.conversations().await.is_empty());
    assert_eq!(seller.badge_count().await, 0);

    let conversation = h.conversation().await;
    assert!(eventually(|| async { seller.conversations().await.len() == 1 }).await);
    assert!(eventually(|| async { seller.badge_count().await == 1 }).await);
    assert!(!seller.is_unread(conversation.id).await);

    h.services
        .send_message(conversation.id, h.buyer, "Is this available?")
        .await
        .unwrap();
    assert!(eventually(|| async { seller.is_unread(conversation.id).await }).await);
    assert!(eventually(|| async { seller.badge_count().await == 2 }).await);
    seller.close().await;
}

#[tokio::test]
async fn own_messages_never_make_a_conversation_unread() {
    let h = Harness::new().await;
    let conversation = h.conversation().await;
    let buyer = UnreadAggregator::start(h.services.clone(), h.provider(h.buyer))
        .await
        .unwrap();

    h.services
        .send_message(conversation.id, h.buyer, "hi")
        .await
        .unwrap();
    assert!(
        eventually(|| async {
            buyer.conversations().await[0]
                .latest
                .as_ref()
                .is_some_and(|m| m.content == "hi")
        })
        .await
    );
    assert!(!buyer.is_unread(conversation.id).await);
    buyer.close().await;
}

#[tokio::test]
async fn opening_a_conversation_marks_it_read() {
    let h = Harness::new().await;
    let conversation = h.conversation().await;
    let seller = UnreadAggregator::start(h.services.clone(), h.provider(h.seller))
        .await
        .unwrap();

    h.services
        .send_message(conversation.id, h.buyer, "one")
        .await
        .unwrap();
    assert!(eventually(|| async { seller.is_unread(conversation.id).await }).await);

    seller.mark_conversation_opened(conversation.id).await;
    assert!(!seller.is_unread(conversation.id).await);

    // arrives while the conversation is on screen
    h.services
        .send_message(conversation.id, h.buyer, "two")
        .await
        .unwrap();
    assert!(
        eventually(|| async {
            seller.conversations().await[0]
                .latest
                .as_ref()
                .is_some_and(|m| m.content == "two")
        })
        .await
    );
    assert!(!seller.is_unread(conversation.id).await);

    seller.mark_conversation_closed(conversation.id).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    h.services
        .send_message(conversation.id, h.buyer, "three")
        .await
        .unwrap();
    assert!(eventually(|| async { seller.is_unread(conversation.id).await }).await);
    seller.close().await;
}

#[tokio::test]
async fn deleting_the_latest_message_falls_back_to_the_previous_one() {
    let h = Harness::new().await;
    let conversation = h.conversation().await;
    h.services
        .send_message(conversation.id, h.buyer, "first")
        .await
        .unwrap();
    let second = h
        .services
        .send_message(conversation.id, h.buyer, "second")
        .await
        .unwrap();
    let seller = UnreadAggregator::start(h.services.clone(), h.provider(h.seller))
        .await
        .unwrap();

    h.services.messages.delete(second.id, h.buyer).await.unwrap();
    assert!(
        eventually(|| async {
            seller.conversations().await[0]
                .latest
                .as_ref()
                .is_some_and(|m| m.content == "first")
        })
        .await
    );
    seller.close().await;
}

#[tokio::test]
async fn notification_reads_lower_the_badge() {
    let h = Harness::new().await;
    let conversation = h.conversation().await;
    for text in ["a", "b"] {
        h.services
            .send_message(conversation.id, h.buyer, text)
            .await
            .unwrap();
    }
    let seller = UnreadAggregator::start(h.services.clone(), h.provider(h.seller))
        .await
        .unwrap();
    assert_eq!(seller.badge_count().await, 3);

    let newest = h
        .services
        .notifications
        .fetch_recent(h.seller, 1)
        .await
        .unwrap()
        .remove(0);
    seller.mark_notification_read(newest.id).await.unwrap();
    assert_eq!(seller.badge_count().await, 2);

    seller.mark_all_notifications_read().await.unwrap();
    assert_eq!(seller.badge_count().await, 0);
    // the update events arriving afterwards keep it at zero
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seller.badge_count().await, 0);
    assert_eq!(h.services.notifications.unread_count(h.seller).await.unwrap(), 0);
    seller.close().await;
}

#[tokio::test]
async fn remote_conversation_delete_drops_the_entry() {
    let h = Harness::new().await;
    let conversation = h.conversation().await;
    let seller = UnreadAggregator::start(h.services.clone(), h.provider(h.seller))
        .await
        .unwrap();
    assert_eq!(seller.conversations().await.len(), 1);

    h.services
        .conversations
        .delete(conversation.id, h.buyer)
        .await
        .unwrap();
    assert!(eventually(|| async { seller.conversations().await.is_empty() }).await);
    seller.close().await;
}

#[tokio::test]
async fn sign_out_clears_everything() {
    let h = Harness::new().await;
    let conversation = h.conversation().await;
    let identity = Arc::new(h.identity(h.seller));
    let seller = UnreadAggregator::start(h.services.clone(), identity.clone())
        .await
        .unwrap();
    assert_eq!(seller.conversations().await.len(), 1);
    assert_eq!(seller.badge_count().await, 1);

    identity.sign_out();
    assert!(
        eventually(|| async {
            seller.conversations().await.is_empty() && seller.badge_count().await == 0
        })
        .await
    );
    for table in [Table::Conversations, Table::Messages, Table::Notifications] {
        assert_eq!(h.services.feed.subscriber_count(table).await, 0, "{table}");
    }

    // nothing counts for a signed-out viewer
    h.services
        .notifications
        .create(h.seller, "Price dropped", NotificationKind::PriceDrop, None)
        .await
        .unwrap();
    h.services
        .send_message(conversation.id, h.buyer, "still there?")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seller.badge_count().await, 0);
    assert!(seller.conversations().await.is_empty());
    seller.close().await;
}

#[tokio::test]
async fn message_during_preview_read_keeps_the_newer_preview() {
    let h = Harness::new().await;
    let seller = UnreadAggregator::start(h.services.clone(), h.provider(h.seller))
        .await
        .unwrap();
    // the preview read for the new conversation sees no messages yet
    h.slow.delay_latest(Duration::from_millis(200));

    let conversation = h.conversation().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.services
        .send_message(conversation.id, h.buyer, "Is this available?")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let list = seller.conversations().await;
    assert_eq!(list.len(), 1);
    assert_eq!(
        list[0].latest.as_ref().map(|m| m.content.as_str()),
        Some("Is this available?")
    );
    assert!(seller.is_unread(conversation.id).await);
    seller.close().await;
}
