mod common;

use chrono::Utc;
use common::{eventually, Harness, LISTING, MAX_MESSAGE_LENGTH};
use marketplace_chat_service::error::AppError;
use marketplace_chat_service::realtime::{ChangeKind, RowChange, Table};
use marketplace_chat_service::repository::ConversationRepository;
use marketplace_chat_service::services::SessionIdentity;
use marketplace_chat_service::session::{ChatSession, OpenTarget};
use std::sync::Arc;

#[tokio::test]
async fn opening_requires_a_signed_in_user() {
    let h = Harness::new().await;
    let signed_out = Arc::new(SessionIdentity::new());

    let err = ChatSession::open(h.services.clone(), signed_out, OpenTarget::Listing(LISTING))
        .await
        .err()
        .expect("open must fail");
    assert!(matches!(err, AppError::Unauthorized));
}

#[tokio::test]
async fn open_by_listing_loads_history_in_order() {
    let h = Harness::new().await;
    let conversation = h.conversation().await;
    for (sender, text) in [(h.buyer, "hi"), (h.seller, "hello"), (h.buyer, "price?")] {
        h.services
            .send_message(conversation.id, sender, text)
            .await
            .unwrap();
    }

    let session = ChatSession::open(
        h.services.clone(),
        h.provider(h.buyer),
        OpenTarget::Listing(LISTING),
    )
    .await
    .unwrap();

    assert_eq!(session.conversation_id(), conversation.id);
    let contents: Vec<String> = session
        .messages()
        .await
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["hi", "hello", "price?"]);
    assert!(session.history_error().await.is_none());
    session.close().await;
}

#[tokio::test]
async fn strangers_cannot_open_existing_conversations() {
    let h = Harness::new().await;
    let conversation = h.conversation().await;

    let err = ChatSession::open(
        h.services.clone(),
        h.provider(h.stranger),
        OpenTarget::Existing(conversation.id),
    )
    .await
    .err()
    .expect("open must fail");
    assert!(matches!(err, AppError::Forbidden));
}

#[tokio::test]
async fn messages_from_the_other_side_arrive_live() {
    let h = Harness::new().await;
    let conversation = h.conversation().await;
    let buyer_view = ChatSession::open(
        h.services.clone(),
        h.provider(h.buyer),
        OpenTarget::Existing(conversation.id),
    )
    .await
    .unwrap();
    let seller_view = ChatSession::open(
        h.services.clone(),
        h.provider(h.seller),
        OpenTarget::Existing(conversation.id),
    )
    .await
    .unwrap();

    let sent = buyer_view.send("Is this available?").await.unwrap();
    assert_eq!(buyer_view.messages().await, vec![sent.clone()]);

    assert!(eventually(|| async { seller_view.messages().await.len() == 1 }).await);
    // the sender's own echo does not duplicate the optimistic entry
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(buyer_view.messages().await.len(), 1);
    assert_eq!(seller_view.messages().await[0].id, sent.id);

    buyer_view.close().await;
    seller_view.close().await;
}

#[tokio::test]
async fn duplicate_insert_events_do_not_duplicate_messages() {
    let h = Harness::new().await;
    let conversation = h.conversation().await;
    let session = ChatSession::open(
        h.services.clone(),
        h.provider(h.seller),
        OpenTarget::Existing(conversation.id),
    )
    .await
    .unwrap();
    let message = h
        .services
        .messages
        .append(conversation.id, h.buyer, "hello")
        .await
        .unwrap();

    let replay = RowChange {
        table: Table::Messages,
        kind: ChangeKind::Insert,
        record: serde_json::to_value(&message).unwrap(),
        origin: uuid::Uuid::new_v4(),
        committed_at: Utc::now(),
    };
    h.services.feed.deliver(replay.clone()).await;
    h.services.feed.deliver(replay).await;

    assert!(eventually(|| async { !session.messages().await.is_empty() }).await);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(session.messages().await.len(), 1);
    session.close().await;
}

#[tokio::test]
async fn failed_send_keeps_the_draft() {
    let h = Harness::new().await;
    let session = ChatSession::open(
        h.services.clone(),
        h.provider(h.buyer),
        OpenTarget::Listing(LISTING),
    )
    .await
    .unwrap();

    let draft = "a".repeat(MAX_MESSAGE_LENGTH + 1);
    let err = session.send(&draft).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
    assert_eq!(session.failed_draft().await.as_deref(), Some(draft.as_str()));
    assert!(session.is_open().await);
    assert!(session.messages().await.is_empty());

    session.send("shorter").await.unwrap();
    assert!(session.failed_draft().await.is_none());
    session.close().await;
}

#[tokio::test]
async fn sending_after_sign_out_is_unauthorized() {
    let h = Harness::new().await;
    let identity = Arc::new(h.identity(h.buyer));
    let session = ChatSession::open(
        h.services.clone(),
        identity.clone(),
        OpenTarget::Listing(LISTING),
    )
    .await
    .unwrap();

    identity.sign_out();
    let err = session.send("hello?").await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized));
    assert_eq!(h.store.message_count(session.conversation_id()).await, 0);
    session.close().await;
}

#[tokio::test]
async fn deleting_a_message_removes_it_locally() {
    let h = Harness::new().await;
    let session = ChatSession::open(
        h.services.clone(),
        h.provider(h.buyer),
        OpenTarget::Listing(LISTING),
    )
    .await
    .unwrap();
    let keep = session.send("keep").await.unwrap();
    let discard = session.send("drop").await.unwrap();

    session.delete_message(discard.id).await.unwrap();
    assert_eq!(session.messages().await, vec![keep.clone()]);

    // not the sender
    let seller_session = ChatSession::open(
        h.services.clone(),
        h.provider(h.seller),
        OpenTarget::Existing(session.conversation_id()),
    )
    .await
    .unwrap();
    let err = seller_session.delete_message(keep.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
    assert_eq!(seller_session.messages().await.len(), 1);

    session.close().await;
    seller_session.close().await;
}

#[tokio::test]
async fn remote_conversation_delete_empties_the_other_view() {
    let h = Harness::new().await;
    let conversation = h.conversation().await;
    let buyer_view = ChatSession::open(
        h.services.clone(),
        h.provider(h.buyer),
        OpenTarget::Existing(conversation.id),
    )
    .await
    .unwrap();
    let seller_view = ChatSession::open(
        h.services.clone(),
        h.provider(h.seller),
        OpenTarget::Existing(conversation.id),
    )
    .await
    .unwrap();
    buyer_view.send("bye").await.unwrap();
    assert!(eventually(|| async { seller_view.messages().await.len() == 1 }).await);

    buyer_view.delete_conversation().await.unwrap();
    assert!(buyer_view.is_gone().await);

    assert!(eventually(|| async { seller_view.is_gone().await }).await);
    assert!(seller_view.messages().await.is_empty());

    let err = seller_view.send("hello?").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    buyer_view.close().await;
    seller_view.close().await;
}

#[tokio::test]
async fn retry_history_reports_a_vanished_conversation() {
    let h = Harness::new().await;
    let conversation = h.conversation().await;
    let session = ChatSession::open(
        h.services.clone(),
        h.provider(h.buyer),
        OpenTarget::Existing(conversation.id),
    )
    .await
    .unwrap();

    // removed behind the feed's back
    ConversationRepository::delete(&h.store, conversation.id)
        .await
        .unwrap();

    let err = session.retry_history().await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(session.is_gone().await);
    assert!(matches!(
        session.history_error().await,
        Some(AppError::NotFound(_))
    ));
    session.close().await;
}

#[tokio::test]
async fn close_is_idempotent_and_releases_subscriptions() {
    let h = Harness::new().await;
    let conversation = h.conversation().await;
    let session = ChatSession::open(
        h.services.clone(),
        h.provider(h.buyer),
        OpenTarget::Existing(conversation.id),
    )
    .await
    .unwrap();
    assert_eq!(h.services.feed.subscriber_count(Table::Messages).await, 1);
    assert_eq!(h.services.feed.subscriber_count(Table::Conversations).await, 1);

    session.close().await;
    session.close().await;
    assert!(!session.is_open().await);
    assert_eq!(h.services.feed.subscriber_count(Table::Messages).await, 0);
    assert_eq!(h.services.feed.subscriber_count(Table::Conversations).await, 0);

    // late events are ignored
    h.services
        .send_message(conversation.id, h.seller, "anyone?")
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(session.messages().await.is_empty());
}

#[tokio::test]
async fn delete_during_history_load_stays_deleted() {
    let h = Harness::new().await;
    let conversation = h.conversation().await;
    let typo = h
        .services
        .send_message(conversation.id, h.buyer, "typo")
        .await
        .unwrap();
    // rows are read, then held back while the delete goes through
    h.slow.delay_history(std::time::Duration::from_millis(200));

    let (opened, deleted) = tokio::join!(
        ChatSession::open(
            h.services.clone(),
            h.provider(h.seller),
            OpenTarget::Existing(conversation.id),
        ),
        async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            h.services.messages.delete(typo.id, h.buyer).await
        }
    );
    deleted.unwrap();
    let session = opened.unwrap();

    assert_eq!(h.store.message_count(conversation.id).await, 0);
    assert!(session.messages().await.is_empty());

    // the same stale rows on a retry are filtered too
    h.slow.delay_history(std::time::Duration::ZERO);
    assert_eq!(session.retry_history().await.unwrap(), 0);
    assert!(session.messages().await.is_empty());
    session.close().await;
}

#[tokio::test]
async fn sender_without_profile_name_uses_session_metadata() {
    let h = Harness::new().await;
    h.profiles.insert(h.buyer, None).await;
    let identity = Arc::new(h.identity(h.buyer));
    identity.set_metadata_name(h.buyer, "Bea from token").await;

    let session = ChatSession::open(
        h.services.clone(),
        identity.clone(),
        OpenTarget::Listing(LISTING),
    )
    .await
    .unwrap();
    session.send("Still for sale?").await.unwrap();

    let notices = h
        .services
        .notifications
        .fetch_recent(h.seller, 10)
        .await
        .unwrap();
    assert!(notices
        .iter()
        .any(|n| n.content == "New message from Bea from token: Still for sale?"));
    session.close().await;
}
