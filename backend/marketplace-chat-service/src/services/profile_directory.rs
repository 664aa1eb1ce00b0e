use super::identity::AuthMetadata;
use crate::error::AppResult;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Read-only view of the profile service.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn user_exists(&self, user_id: Uuid) -> AppResult<bool>;
    async fn profile_name(&self, user_id: Uuid) -> AppResult<Option<String>>;
}

#[derive(Clone)]
pub struct PgProfileDirectory {
    db: PgPool,
}

impl PgProfileDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProfileDirectory for PgProfileDirectory {
    async fn user_exists(&self, user_id: Uuid) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM profiles WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.db)
            .await?;
        Ok(exists)
    }

    async fn profile_name(&self, user_id: Uuid) -> AppResult<Option<String>> {
        let name: Option<Option<String>> =
            sqlx::query_scalar("SELECT full_name FROM profiles WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(name.flatten())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryProfileDirectory {
    profiles: Arc<RwLock<HashMap<Uuid, Option<String>>>>,
    open: bool,
}

impl InMemoryProfileDirectory {
    /// Only registered users exist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every user id exists; names only for registered ones. For
    /// `STORAGE_BACKEND=memory` runs where no profile service is around.
    pub fn open() -> Self {
        Self {
            open: true,
            ..Self::default()
        }
    }

    pub async fn insert(&self, user_id: Uuid, full_name: Option<&str>) {
        self.profiles
            .write()
            .await
            .insert(user_id, full_name.map(str::to_string));
    }
}

#[async_trait]
impl ProfileDirectory for InMemoryProfileDirectory {
    async fn user_exists(&self, user_id: Uuid) -> AppResult<bool> {
        Ok(self.open || self.profiles.read().await.contains_key(&user_id))
    }

    async fn profile_name(&self, user_id: Uuid) -> AppResult<Option<String>> {
        Ok(self.profiles.read().await.get(&user_id).cloned().flatten())
    }
}

/// First 8 characters of the id, the last-resort display name.
pub fn short_id(user_id: Uuid) -> String {
    user_id.to_string().chars().take(8).collect()
}

/// Single source of user display names: profile record, then auth
/// metadata, then the short id.
#[derive(Clone)]
pub struct DisplayNameResolver {
    profiles: Arc<dyn ProfileDirectory>,
    auth: Arc<dyn AuthMetadata>,
}

impl DisplayNameResolver {
    pub fn new(profiles: Arc<dyn ProfileDirectory>, auth: Arc<dyn AuthMetadata>) -> Self {
        Self { profiles, auth }
    }

    pub async fn resolve_display_name(&self, user_id: Uuid) -> String {
        match self.profiles.profile_name(user_id).await {
            Ok(Some(name)) if !name.trim().is_empty() => return name.trim().to_string(),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "profile lookup failed, falling back");
            }
        }

        if let Some(name) = self.auth.metadata_name(user_id).await {
            return name;
        }

        short_id(user_id)
    }
}
