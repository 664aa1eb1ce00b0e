//! Derived unread state for the conversation list and the navbar badge.
//!
//! A conversation is unread when its latest message came from the other
//! participant and is newer than what the viewer has seen while the
//! conversation was open in this client session. The badge counts unread
//! notification ids, so duplicate deliveries never double count.

use crate::error::{AppError, AppResult};
use crate::models::{Conversation, Message, Notification};
use crate::realtime::{ChangeHandler, Filter, Subscription, Table};
use crate::services::IdentityProvider;
use crate::state::ChatServices;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

type OrderKey = (DateTime<Utc>, i64, Uuid);

fn order_key(message: &Message) -> OrderKey {
    (message.created_at, message.sequence_number, message.id)
}

/// One row of the conversation list
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub latest: Option<Message>,
    pub unread: bool,
}

struct Entry {
    conversation: Conversation,
    latest: Option<Message>,
}

/// Pure bookkeeping; every event maps to one method here.
pub struct UnreadState {
    viewer: Uuid,
    entries: HashMap<Uuid, Entry>,
    /// Newest message seen while open, per conversation
    watermarks: HashMap<Uuid, OrderKey>,
    active: HashSet<Uuid>,
    unread_notifications: HashSet<Uuid>,
    /// Read is terminal; an older unread copy never counts again.
    read_notifications: HashSet<Uuid>,
    /// Conversations whose DELETE was seen; a seed read that started
    /// earlier must not re-add them.
    removed: HashSet<Uuid>,
}

impl UnreadState {
    pub fn new(viewer: Uuid) -> Self {
        Self {
            viewer,
            entries: HashMap::new(),
            watermarks: HashMap::new(),
            active: HashSet::new(),
            unread_notifications: HashSet::new(),
            read_notifications: HashSet::new(),
            removed: HashSet::new(),
        }
    }

    /// Insert or refresh a conversation row. Returns `true` if it was new.
    pub fn upsert_conversation(&mut self, conversation: Conversation) -> bool {
        if !conversation.is_participant(self.viewer) || self.removed.contains(&conversation.id) {
            return false;
        }
        match self.entries.get_mut(&conversation.id) {
            Some(entry) => {
                if conversation.updated_at >= entry.conversation.updated_at {
                    entry.conversation = conversation;
                }
                false
            }
            None => {
                self.entries.insert(
                    conversation.id,
                    Entry {
                        conversation,
                        latest: None,
                    },
                );
                true
            }
        }
    }

    pub fn remove_conversation(&mut self, conversation_id: Uuid) -> bool {
        self.removed.insert(conversation_id);
        self.watermarks.remove(&conversation_id);
        self.active.remove(&conversation_id);
        self.entries.remove(&conversation_id).is_some()
    }

    pub fn knows(&self, conversation_id: Uuid) -> bool {
        self.entries.contains_key(&conversation_id)
    }

    /// Apply a new message. Returns `false` for unknown conversations.
    pub fn apply_message(&mut self, message: Message) -> bool {
        let Some(entry) = self.entries.get_mut(&message.conversation_id) else {
            return false;
        };
        if entry.conversation.updated_at < message.created_at {
            entry.conversation.updated_at = message.created_at;
        }
        let newer = entry
            .latest
            .as_ref()
            .map_or(true, |l| order_key(&message) > order_key(l));
        if newer {
            if self.active.contains(&message.conversation_id) {
                self.watermarks
                    .insert(message.conversation_id, order_key(&message));
            }
            entry.latest = Some(message);
        }
        true
    }

    /// Returns `true` when the removed message was the latest one, so the
    /// caller has to re-read the preview.
    pub fn apply_message_delete(&mut self, message: &Message) -> bool {
        self.entries
            .get(&message.conversation_id)
            .and_then(|e| e.latest.as_ref())
            .map_or(false, |l| l.id == message.id)
    }

    /// Apply a targeted re-read of the preview. The read may predate
    /// messages applied since, so it only wins when it is at least as new
    /// as the current preview, or when the current preview is `replacing`
    /// (the message whose delete triggered the re-read).
    pub fn set_latest(
        &mut self,
        conversation_id: Uuid,
        latest: Option<Message>,
        replacing: Option<Uuid>,
    ) -> bool {
        let active = self.active.contains(&conversation_id);
        let Some(entry) = self.entries.get_mut(&conversation_id) else {
            return false;
        };
        let accept = match (&entry.latest, &latest) {
            (None, _) => true,
            (Some(current), Some(read)) if order_key(read) >= order_key(current) => true,
            (Some(current), _) => replacing == Some(current.id),
        };
        if !accept {
            return false;
        }
        if let (true, Some(message)) = (active, &latest) {
            self.watermarks.insert(conversation_id, order_key(message));
        }
        entry.latest = latest;
        true
    }

    pub fn mark_opened(&mut self, conversation_id: Uuid) {
        self.active.insert(conversation_id);
        self.see_latest(conversation_id);
    }

    pub fn mark_closed(&mut self, conversation_id: Uuid) {
        self.see_latest(conversation_id);
        self.active.remove(&conversation_id);
    }

    fn see_latest(&mut self, conversation_id: Uuid) {
        if let Some(latest) = self
            .entries
            .get(&conversation_id)
            .and_then(|e| e.latest.as_ref())
        {
            self.watermarks.insert(conversation_id, order_key(latest));
        }
    }

    pub fn is_unread(&self, conversation_id: Uuid) -> bool {
        let Some(latest) = self
            .entries
            .get(&conversation_id)
            .and_then(|e| e.latest.as_ref())
        else {
            return false;
        };
        if latest.sender_id == self.viewer || self.active.contains(&conversation_id) {
            return false;
        }
        match self.watermarks.get(&conversation_id) {
            Some(seen) => order_key(latest) > *seen,
            None => true,
        }
    }

    /// Most recent activity first.
    pub fn summaries(&self) -> Vec<ConversationSummary> {
        let mut out: Vec<ConversationSummary> = self
            .entries
            .values()
            .map(|e| ConversationSummary {
                conversation: e.conversation.clone(),
                latest: e.latest.clone(),
                unread: self.is_unread(e.conversation.id),
            })
            .collect();
        out.sort_by(|a, b| {
            b.conversation
                .updated_at
                .cmp(&a.conversation.updated_at)
                .then(b.conversation.id.cmp(&a.conversation.id))
        });
        out
    }

    pub fn apply_notification(&mut self, notification: &Notification) {
        if notification.recipient_id != self.viewer {
            return;
        }
        if notification.is_read {
            self.notification_read(notification.id);
        } else if !self.read_notifications.contains(&notification.id) {
            self.unread_notifications.insert(notification.id);
        }
    }

    pub fn notification_read(&mut self, notification_id: Uuid) {
        self.unread_notifications.remove(&notification_id);
        self.read_notifications.insert(notification_id);
    }

    pub fn all_notifications_read(&mut self) {
        self.read_notifications
            .extend(self.unread_notifications.drain());
    }

    pub fn badge_count(&self) -> usize {
        self.unread_notifications.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.watermarks.clear();
        self.active.clear();
        self.unread_notifications.clear();
        self.read_notifications.clear();
    }
}

struct Inner {
    services: ChatServices,
    viewer: Uuid,
    state: Mutex<UnreadState>,
    subscriptions: Mutex<Vec<Subscription>>,
    message_subs: Mutex<HashMap<Uuid, Subscription>>,
    closed: Mutex<bool>,
}

impl Inner {
    async fn is_closed(&self) -> bool {
        *self.closed.lock().await
    }

    /// Stop every channel and drop derived state. Idempotent.
    async fn shutdown(&self) {
        *self.closed.lock().await = true;

        let subscriptions: Vec<Subscription> = self.subscriptions.lock().await.drain(..).collect();
        for subscription in subscriptions {
            subscription.unsubscribe().await;
        }
        let message_subs: Vec<Subscription> = self
            .message_subs
            .lock()
            .await
            .drain()
            .map(|(_, sub)| sub)
            .collect();
        for subscription in message_subs {
            subscription.unsubscribe().await;
        }
        self.state.lock().await.clear();
    }

    /// Start following a conversation's messages, then refresh its preview.
    async fn track(self: &Arc<Self>, conversation_id: Uuid) {
        if self.is_closed().await {
            return;
        }
        {
            let mut subs = self.message_subs.lock().await;
            // removed while the caller was on its way here
            if !self.state.lock().await.knows(conversation_id) || self.is_closed().await {
                return;
            }
            if !subs.contains_key(&conversation_id) {
                let sub = self
                    .services
                    .feed
                    .subscribe(
                        Filter::table(Table::Messages).eq("conversation_id", conversation_id),
                        MessageEvents {
                            inner: Arc::downgrade(self),
                            conversation_id,
                        },
                    )
                    .await;
                subs.insert(conversation_id, sub);
            }
        }
        self.refresh_latest(conversation_id, None).await;
    }

    async fn untrack(&self, conversation_id: Uuid) {
        let sub = self.message_subs.lock().await.remove(&conversation_id);
        if let Some(sub) = sub {
            sub.unsubscribe().await;
        }
    }

    async fn refresh_latest(&self, conversation_id: Uuid, replacing: Option<Uuid>) {
        match self.services.messages.latest(conversation_id).await {
            Ok(latest) => {
                let applied = self
                    .state
                    .lock()
                    .await
                    .set_latest(conversation_id, latest, replacing);
                if !applied {
                    tracing::debug!(conversation_id = %conversation_id, "stale preview read discarded");
                }
            }
            Err(e) => tracing::warn!(
                conversation_id = %conversation_id,
                error = %e,
                "failed to refresh latest message"
            ),
        }
    }
}

/// The aggregator, unless it is gone or shut down.
async fn live(inner: &Weak<Inner>) -> Option<Arc<Inner>> {
    let inner = inner.upgrade()?;
    if inner.is_closed().await {
        return None;
    }
    Some(inner)
}

struct ConversationEvents(Weak<Inner>);

#[async_trait]
impl ChangeHandler<Conversation> for ConversationEvents {
    async fn on_insert(&self, conversation: Conversation) {
        let Some(inner) = live(&self.0).await else { return };
        let id = conversation.id;
        let added = inner.state.lock().await.upsert_conversation(conversation);
        if added {
            inner.track(id).await;
        }
    }

    async fn on_update(&self, conversation: Conversation) {
        let Some(inner) = live(&self.0).await else { return };
        let id = conversation.id;
        let added = inner.state.lock().await.upsert_conversation(conversation);
        if added {
            inner.track(id).await;
        }
    }

    async fn on_delete(&self, conversation: Conversation) {
        let Some(inner) = live(&self.0).await else { return };
        inner.state.lock().await.remove_conversation(conversation.id);
        inner.untrack(conversation.id).await;
    }
}

struct MessageEvents {
    inner: Weak<Inner>,
    conversation_id: Uuid,
}

#[async_trait]
impl ChangeHandler<Message> for MessageEvents {
    async fn on_insert(&self, message: Message) {
        let Some(inner) = live(&self.inner).await else { return };
        inner.state.lock().await.apply_message(message);
    }

    async fn on_delete(&self, message: Message) {
        let Some(inner) = live(&self.inner).await else { return };
        let was_latest = inner.state.lock().await.apply_message_delete(&message);
        if was_latest {
            inner
                .refresh_latest(self.conversation_id, Some(message.id))
                .await;
        }
    }
}

struct NotificationEvents(Weak<Inner>);

#[async_trait]
impl ChangeHandler<Notification> for NotificationEvents {
    async fn on_insert(&self, notification: Notification) {
        if let Some(inner) = live(&self.0).await {
            inner.state.lock().await.apply_notification(&notification);
        }
    }

    async fn on_update(&self, notification: Notification) {
        if let Some(inner) = live(&self.0).await {
            inner.state.lock().await.apply_notification(&notification);
        }
    }
}

/// Live unread view for the signed-in user.
pub struct UnreadAggregator {
    inner: Arc<Inner>,
    auth_watch: JoinHandle<()>,
}

impl UnreadAggregator {
    /// Subscribe to the viewer's conversations and notifications, then seed
    /// from storage.
    pub async fn start(
        services: ChatServices,
        identity: Arc<dyn IdentityProvider>,
    ) -> AppResult<Self> {
        let viewer = identity.current_user().ok_or(AppError::Unauthorized)?;
        let inner = Arc::new(Inner {
            services: services.clone(),
            viewer,
            state: Mutex::new(UnreadState::new(viewer)),
            subscriptions: Mutex::new(Vec::new()),
            message_subs: Mutex::new(HashMap::new()),
            closed: Mutex::new(false),
        });

        let feed = &services.feed;
        *inner.subscriptions.lock().await = vec![
            feed.subscribe(
                Filter::table(Table::Conversations).eq("buyer_id", viewer),
                ConversationEvents(Arc::downgrade(&inner)),
            )
            .await,
            feed.subscribe(
                Filter::table(Table::Conversations).eq("seller_id", viewer),
                ConversationEvents(Arc::downgrade(&inner)),
            )
            .await,
            services
                .notifications
                .subscribe(viewer, NotificationEvents(Arc::downgrade(&inner)))
                .await,
        ];

        // Stale state must not outlive the sign-in it belongs to.
        let mut auth = identity.auth_changes();
        let weak = Arc::downgrade(&inner);
        let auth_watch = tokio::spawn(async move {
            while auth.changed().await.is_ok() {
                let current = *auth.borrow();
                if current != Some(viewer) {
                    if let Some(inner) = weak.upgrade() {
                        tracing::info!(viewer = %viewer, "viewer signed out, clearing unread state");
                        inner.shutdown().await;
                    }
                    break;
                }
            }
        });

        let aggregator = Self { inner, auth_watch };
        aggregator.seed().await?;
        Ok(aggregator)
    }

    async fn seed(&self) -> AppResult<()> {
        let services = &self.inner.services;
        let conversations = services.conversations.list_for_user(self.inner.viewer).await?;
        let unread = services.notifications.unread(self.inner.viewer).await?;

        let ids: Vec<Uuid> = {
            let mut state = self.inner.state.lock().await;
            if *self.inner.closed.lock().await {
                return Ok(());
            }
            let ids = conversations.iter().map(|c| c.id).collect::<Vec<_>>();
            for conversation in conversations {
                state.upsert_conversation(conversation);
            }
            for notification in &unread {
                state.apply_notification(notification);
            }
            ids.into_iter().filter(|id| state.knows(*id)).collect()
        };
        for id in ids {
            self.inner.track(id).await;
        }
        Ok(())
    }

    pub fn viewer(&self) -> Uuid {
        self.inner.viewer
    }

    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        self.inner.state.lock().await.summaries()
    }

    pub async fn is_unread(&self, conversation_id: Uuid) -> bool {
        self.inner.state.lock().await.is_unread(conversation_id)
    }

    pub async fn badge_count(&self) -> usize {
        self.inner.state.lock().await.badge_count()
    }

    /// The viewer has the conversation on screen.
    pub async fn mark_conversation_opened(&self, conversation_id: Uuid) {
        self.inner.state.lock().await.mark_opened(conversation_id);
    }

    pub async fn mark_conversation_closed(&self, conversation_id: Uuid) {
        self.inner.state.lock().await.mark_closed(conversation_id);
    }

    pub async fn mark_notification_read(&self, notification_id: Uuid) -> AppResult<()> {
        self.inner
            .services
            .notifications
            .mark_read(notification_id, self.inner.viewer)
            .await?;
        self.inner
            .state
            .lock()
            .await
            .notification_read(notification_id);
        Ok(())
    }

    pub async fn mark_all_notifications_read(&self) -> AppResult<()> {
        self.inner
            .services
            .notifications
            .mark_all_read(self.inner.viewer)
            .await?;
        self.inner.state.lock().await.all_notifications_read();
        Ok(())
    }

    pub async fn close(&self) {
        self.auth_watch.abort();
        self.inner.shutdown().await;
    }
}
