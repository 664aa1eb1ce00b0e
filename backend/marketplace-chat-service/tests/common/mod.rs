#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketplace_chat_service::{
    error::{AppError, AppResult},
    models::{Conversation, ListingId, Message, NewConversation, NewMessage},
    realtime::{ChangeFeed, ChangeHandler, ChangeKind, ChangeRecord},
    repository::{ConversationRepository, InMemoryStore, MessageRepository},
    services::{
        IdentityProvider, InMemoryListingDirectory, InMemoryProfileDirectory, SessionIdentity,
        TokenMetadataCache,
    },
    state::{Backends, ChatServices},
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const MAX_MESSAGE_LENGTH: usize = 4000;
pub const PREVIEW_CHARS: usize = 60;
pub const LISTING: ListingId = 1;
pub const LISTING_TITLE: &str = "Road bike";

/// In-memory chat core with one seller, one buyer and one listing.
pub struct Harness {
    pub services: ChatServices,
    pub store: InMemoryStore,
    pub listings: InMemoryListingDirectory,
    pub profiles: InMemoryProfileDirectory,
    pub metadata: TokenMetadataCache,
    pub flaky: FlakyConversations,
    pub slow: SlowMessages,
    pub seller: Uuid,
    pub buyer: Uuid,
    pub stranger: Uuid,
}

impl Harness {
    pub async fn new() -> Self {
        let store = InMemoryStore::new();
        let listings = InMemoryListingDirectory::new();
        let profiles = InMemoryProfileDirectory::new();
        let metadata = TokenMetadataCache::new();
        let flaky = FlakyConversations::new(store.clone());
        let slow = SlowMessages::new(store.clone());

        let seller = Uuid::new_v4();
        let buyer = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        profiles.insert(seller, Some("Sam Seller")).await;
        profiles.insert(buyer, Some("Bea Buyer")).await;
        profiles.insert(stranger, None).await;
        listings.insert(LISTING, Some(seller), LISTING_TITLE).await;

        let services = ChatServices::build(
            Backends {
                conversations: Arc::new(flaky.clone()),
                messages: Arc::new(slow.clone()),
                notifications: Arc::new(store.clone()),
                listings: Arc::new(listings.clone()),
                profiles: Arc::new(profiles.clone()),
                auth_metadata: Arc::new(metadata.clone()),
            },
            ChangeFeed::new(),
            MAX_MESSAGE_LENGTH,
            PREVIEW_CHARS,
        );

        Self {
            services,
            store,
            listings,
            profiles,
            metadata,
            flaky,
            slow,
            seller,
            buyer,
            stranger,
        }
    }

    /// Another listing owned by the same seller.
    pub async fn add_listing(&self, listing_id: ListingId, title: &str) {
        self.listings
            .insert(listing_id, Some(self.seller), title)
            .await;
    }

    pub async fn conversation(&self) -> Conversation {
        self.services
            .conversations
            .resolve_or_create(LISTING, self.buyer)
            .await
            .expect("resolve conversation")
    }

    /// Signed in, sharing the resolver's metadata cache.
    pub fn identity(&self, user_id: Uuid) -> SessionIdentity {
        let identity = SessionIdentity::with_metadata(self.metadata.clone());
        identity.sign_in(user_id);
        identity
    }

    pub fn provider(&self, user_id: Uuid) -> Arc<dyn IdentityProvider> {
        Arc::new(self.identity(user_id))
    }
}

/// Conversation repository whose row delete can be made to fail.
#[derive(Clone)]
pub struct FlakyConversations {
    inner: InMemoryStore,
    fail_delete: Arc<AtomicBool>,
}

impl FlakyConversations {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            fail_delete: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConversationRepository for FlakyConversations {
    async fn find_by_participants(
        &self,
        listing_id: ListingId,
        buyer_id: Uuid,
        seller_id: Uuid,
    ) -> AppResult<Option<Conversation>> {
        self.inner
            .find_by_participants(listing_id, buyer_id, seller_id)
            .await
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        ConversationRepository::find_by_id(&self.inner, id).await
    }

    async fn insert(&self, new: NewConversation) -> AppResult<Option<Conversation>> {
        ConversationRepository::insert(&self.inner, new).await
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Conversation>> {
        self.inner.touch(id, at).await
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(AppError::Transient("connection reset".into()));
        }
        ConversationRepository::delete(&self.inner, id).await
    }

    async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Conversation>> {
        self.inner.list_for_user(user_id).await
    }
}

/// Message repository whose history and preview reads can be held back
/// after the rows were read, so realtime events overtake them.
#[derive(Clone)]
pub struct SlowMessages {
    inner: InMemoryStore,
    history_delay_ms: Arc<AtomicU64>,
    latest_delay_ms: Arc<AtomicU64>,
}

impl SlowMessages {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            history_delay_ms: Arc::new(AtomicU64::new(0)),
            latest_delay_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn delay_history(&self, delay: Duration) {
        self.history_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn delay_latest(&self, delay: Duration) {
        self.latest_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn hold(delay_ms: &AtomicU64) {
        let ms = delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl MessageRepository for SlowMessages {
    async fn insert(&self, new: NewMessage) -> AppResult<Message> {
        MessageRepository::insert(&self.inner, new).await
    }

    async fn list_by_conversation(&self, conversation_id: Uuid) -> AppResult<Vec<Message>> {
        let rows = self.inner.list_by_conversation(conversation_id).await;
        Self::hold(&self.history_delay_ms).await;
        rows
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Message>> {
        MessageRepository::find_by_id(&self.inner, id).await
    }

    async fn delete(&self, id: Uuid) -> AppResult<Option<Message>> {
        MessageRepository::delete(&self.inner, id).await
    }

    async fn delete_by_conversation(&self, conversation_id: Uuid) -> AppResult<u64> {
        self.inner.delete_by_conversation(conversation_id).await
    }

    async fn latest(&self, conversation_id: Uuid) -> AppResult<Option<Message>> {
        let row = self.inner.latest(conversation_id).await;
        Self::hold(&self.latest_delay_ms).await;
        row
    }
}

/// Records every change a subscription delivers.
pub struct Recorder<T> {
    events: Arc<Mutex<Vec<(ChangeKind, T)>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
        }
    }
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn events(&self) -> Vec<(ChangeKind, T)> {
        self.events.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }
}

#[async_trait]
impl<T: ChangeRecord + Clone> ChangeHandler<T> for Recorder<T> {
    async fn on_insert(&self, record: T) {
        self.events.lock().await.push((ChangeKind::Insert, record));
    }
    async fn on_update(&self, record: T) {
        self.events.lock().await.push((ChangeKind::Update, record));
    }
    async fn on_delete(&self, record: T) {
        self.events.lock().await.push((ChangeKind::Delete, record));
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
