use super::message_list::MessageList;
use crate::error::{AppError, AppResult};
use crate::models::{Conversation, ListingId, Message};
use crate::realtime::{ChangeHandler, Filter, Subscription, Table};
use crate::services::IdentityProvider;
use crate::state::ChatServices;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenTarget {
    /// Contact the seller of a listing as the current user.
    Listing(ListingId),
    Existing(Uuid),
}

#[derive(Default)]
struct SessionState {
    conversation: Option<Conversation>,
    messages: MessageList,
    mounted: bool,
    /// The conversation was deleted, here or by the other participant.
    gone: bool,
    failed_draft: Option<String>,
    history_error: Option<AppError>,
    /// Ids seen deleted; a history read that started earlier must not
    /// bring them back.
    deleted: HashSet<Uuid>,
}

impl SessionState {
    fn merge(&mut self, message: Message) -> bool {
        if self.deleted.contains(&message.id) {
            return false;
        }
        self.messages.merge(message)
    }

    fn merge_history(&mut self, history: Vec<Message>) -> usize {
        let deleted = &self.deleted;
        self.messages
            .merge_all(history.into_iter().filter(|m| !deleted.contains(&m.id)))
    }

    fn forget(&mut self, message_id: Uuid) {
        self.deleted.insert(message_id);
        self.messages.remove(message_id);
    }
}

type SharedState = Arc<Mutex<SessionState>>;

struct MessageEvents(SharedState);

#[async_trait]
impl ChangeHandler<Message> for MessageEvents {
    async fn on_insert(&self, message: Message) {
        let mut state = self.0.lock().await;
        if state.mounted && !state.gone {
            state.merge(message);
        }
    }

    async fn on_delete(&self, message: Message) {
        let mut state = self.0.lock().await;
        if state.mounted {
            state.forget(message.id);
        }
    }
}

struct ConversationEvents(SharedState);

#[async_trait]
impl ChangeHandler<Conversation> for ConversationEvents {
    async fn on_update(&self, conversation: Conversation) {
        let mut state = self.0.lock().await;
        if state.mounted && !state.gone {
            state.conversation = Some(conversation);
        }
    }

    async fn on_delete(&self, conversation: Conversation) {
        let mut state = self.0.lock().await;
        if !state.mounted {
            return;
        }
        tracing::info!(conversation_id = %conversation.id, "conversation deleted remotely");
        state.messages.clear();
        state.gone = true;
    }
}

/// Client-side state of one open conversation.
///
/// Methods take `&self` so the session can be shared with concurrent tasks;
/// once [`ChatSession::close`] has run, results of operations still in
/// flight are dropped instead of applied.
pub struct ChatSession {
    services: ChatServices,
    identity: Arc<dyn IdentityProvider>,
    user_id: Uuid,
    conversation_id: Uuid,
    state: SharedState,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl ChatSession {
    /// Resolve the conversation, subscribe, then load history. A failed
    /// history load leaves the session open; see [`ChatSession::retry_history`].
    pub async fn open(
        services: ChatServices,
        identity: Arc<dyn IdentityProvider>,
        target: OpenTarget,
    ) -> AppResult<Self> {
        let user_id = identity.current_user().ok_or(AppError::Unauthorized)?;

        let conversation = match target {
            OpenTarget::Listing(listing_id) => {
                services
                    .conversations
                    .resolve_or_create(listing_id, user_id)
                    .await?
            }
            OpenTarget::Existing(id) => services.conversations.open_existing(id, user_id).await?,
        };
        let conversation_id = conversation.id;

        let state: SharedState = Arc::new(Mutex::new(SessionState {
            conversation: Some(conversation),
            mounted: true,
            ..SessionState::default()
        }));

        // Subscribe before reading history so nothing committed in between
        // is missed; the merge de-duplicates the overlap.
        let messages_sub = services
            .feed
            .subscribe(
                Filter::table(Table::Messages).eq("conversation_id", conversation_id),
                MessageEvents(state.clone()),
            )
            .await;
        let conversation_sub = services
            .feed
            .subscribe(
                Filter::table(Table::Conversations).eq("id", conversation_id),
                ConversationEvents(state.clone()),
            )
            .await;

        let session = Self {
            services,
            identity,
            user_id,
            conversation_id,
            state,
            subscriptions: Mutex::new(vec![messages_sub, conversation_sub]),
        };

        if let Err(e) = session.load_history().await {
            tracing::warn!(
                conversation_id = %conversation_id,
                error = %e,
                "history load failed, session stays open"
            );
        }

        tracing::debug!(conversation_id = %conversation_id, user_id = %user_id, "chat session opened");
        Ok(session)
    }

    async fn load_history(&self) -> AppResult<usize> {
        let result = self.services.messages.list_ordered(self.conversation_id).await;

        let mut state = self.state.lock().await;
        if !state.mounted {
            return Ok(0);
        }
        match result {
            Ok(history) => {
                state.history_error = None;
                Ok(state.merge_history(history))
            }
            Err(e) => {
                if matches!(e, AppError::NotFound(_)) {
                    state.gone = true;
                    state.messages.clear();
                }
                state.history_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Re-run the history load. Returns how many messages were new.
    pub async fn retry_history(&self) -> AppResult<usize> {
        self.load_history().await
    }

    pub async fn send(&self, content: &str) -> AppResult<Message> {
        let result = self.try_send(content).await;

        let mut state = self.state.lock().await;
        match &result {
            Ok(message) => {
                if state.mounted {
                    state.merge(message.clone());
                    state.failed_draft = None;
                }
            }
            Err(e) => {
                tracing::warn!(conversation_id = %self.conversation_id, error = %e, "send failed");
                if state.mounted {
                    state.failed_draft = Some(content.to_string());
                }
            }
        }
        drop(state);

        if let Ok(message) = &result {
            self.services.notify_message(message).await;
        }
        result
    }

    async fn try_send(&self, content: &str) -> AppResult<Message> {
        match self.identity.current_user() {
            Some(user) if user == self.user_id => {}
            _ => return Err(AppError::Unauthorized),
        }
        if self.state.lock().await.gone {
            return Err(AppError::not_found(format!(
                "conversation {}",
                self.conversation_id
            )));
        }
        self.services
            .messages
            .append(self.conversation_id, self.user_id, content)
            .await
    }

    /// Server confirmation first; local removal only afterwards.
    pub async fn delete_message(&self, message_id: Uuid) -> AppResult<()> {
        self.services.messages.delete(message_id, self.user_id).await?;
        let mut state = self.state.lock().await;
        if state.mounted {
            state.forget(message_id);
        }
        Ok(())
    }

    pub async fn delete_conversation(&self) -> AppResult<()> {
        self.services
            .conversations
            .delete(self.conversation_id, self.user_id)
            .await?;
        let mut state = self.state.lock().await;
        if state.mounted {
            state.messages.clear();
            state.gone = true;
        }
        Ok(())
    }

    /// Unsubscribe every channel. Idempotent.
    pub async fn close(&self) {
        self.state.lock().await.mounted = false;
        let subscriptions: Vec<Subscription> = self.subscriptions.lock().await.drain(..).collect();
        for subscription in subscriptions {
            subscription.unsubscribe().await;
        }
        tracing::debug!(conversation_id = %self.conversation_id, "chat session closed");
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub async fn conversation(&self) -> Option<Conversation> {
        self.state.lock().await.conversation.clone()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.messages.to_vec()
    }

    pub async fn is_gone(&self) -> bool {
        self.state.lock().await.gone
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.mounted
    }

    /// Text of the last failed send, kept for retry.
    pub async fn failed_draft(&self) -> Option<String> {
        self.state.lock().await.failed_draft.clone()
    }

    pub async fn history_error(&self) -> Option<AppError> {
        self.state.lock().await.history_error.clone()
    }
}
