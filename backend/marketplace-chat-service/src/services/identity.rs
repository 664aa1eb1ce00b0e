//! Who is signed in, and what the auth provider knows about users.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

/// Display names carried by the auth provider (token claims, user metadata).
#[async_trait]
pub trait AuthMetadata: Send + Sync {
    async fn metadata_name(&self, user_id: Uuid) -> Option<String>;
}

/// Current-user source for client-side controllers.
pub trait IdentityProvider: AuthMetadata {
    /// `None` means signed out.
    fn current_user(&self) -> Option<Uuid>;

    /// Fires on every sign-in / sign-out.
    fn auth_changes(&self) -> watch::Receiver<Option<Uuid>>;
}

/// Names learned from verified tokens. Fed by the auth middleware.
#[derive(Clone, Default)]
pub struct TokenMetadataCache {
    names: Arc<RwLock<HashMap<Uuid, String>>>,
}

impl TokenMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn observe(&self, user_id: Uuid, name: Option<&str>) {
        let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
            return;
        };
        let mut guard = self.names.write().await;
        if guard.get(&user_id).map(String::as_str) != Some(name) {
            guard.insert(user_id, name.to_string());
        }
    }
}

#[async_trait]
impl AuthMetadata for TokenMetadataCache {
    async fn metadata_name(&self, user_id: Uuid) -> Option<String> {
        self.names.read().await.get(&user_id).cloned()
    }
}

/// In-process identity for a single client session.
///
/// Names set with [`SessionIdentity::set_metadata_name`] land in the
/// metadata cache it was built with; pass the cache given to
/// `Backends::auth_metadata` so the display-name resolver sees them.
#[derive(Clone)]
pub struct SessionIdentity {
    tx: Arc<watch::Sender<Option<Uuid>>>,
    metadata: TokenMetadataCache,
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionIdentity {
    pub fn new() -> Self {
        Self::with_metadata(TokenMetadataCache::new())
    }

    pub fn with_metadata(metadata: TokenMetadataCache) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            metadata,
        }
    }

    pub fn signed_in(user_id: Uuid) -> Self {
        let identity = Self::new();
        identity.sign_in(user_id);
        identity
    }

    pub fn sign_in(&self, user_id: Uuid) {
        self.tx.send_replace(Some(user_id));
    }

    pub fn sign_out(&self) {
        self.tx.send_replace(None);
    }

    pub async fn set_metadata_name(&self, user_id: Uuid, name: &str) {
        self.metadata.observe(user_id, Some(name)).await;
    }
}

#[async_trait]
impl AuthMetadata for SessionIdentity {
    async fn metadata_name(&self, user_id: Uuid) -> Option<String> {
        self.metadata.metadata_name(user_id).await
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_user(&self) -> Option<Uuid> {
        *self.tx.borrow()
    }

    fn auth_changes(&self) -> watch::Receiver<Option<Uuid>> {
        self.tx.subscribe()
    }
}
