use crate::error::{AppError, AppResult};
use crate::models::ListingId;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingSummary {
    pub id: ListingId,
    pub seller_id: Uuid,
    pub title: String,
}

/// Read-only view of the listing service.
#[async_trait]
pub trait ListingDirectory: Send + Sync {
    /// `NotFound` when the listing is missing or has no seller.
    async fn listing(&self, listing_id: ListingId) -> AppResult<ListingSummary>;
}

#[derive(Clone)]
pub struct PgListingDirectory {
    db: PgPool,
}

impl PgListingDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ListingDirectory for PgListingDirectory {
    async fn listing(&self, listing_id: ListingId) -> AppResult<ListingSummary> {
        let row = sqlx::query("SELECT id, seller_id, title FROM listings WHERE id = $1")
            .bind(listing_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::not_found(format!("listing {listing_id}")))?;

        let seller_id: Option<Uuid> = row.try_get("seller_id")?;
        let seller_id =
            seller_id.ok_or_else(|| AppError::not_found(format!("seller of listing {listing_id}")))?;

        Ok(ListingSummary {
            id: row.try_get("id")?,
            seller_id,
            title: row.try_get("title")?,
        })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryListingDirectory {
    listings: Arc<RwLock<HashMap<ListingId, (Option<Uuid>, String)>>>,
}

impl InMemoryListingDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `id=seller_uuid[:title]` entries separated by commas.
    pub fn from_seed(seed: &str) -> Result<Self, AppError> {
        let mut listings = HashMap::new();
        for entry in seed.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (id, rest) = entry
                .split_once('=')
                .ok_or_else(|| AppError::Config(format!("bad listing seed entry: {entry}")))?;
            let (seller, title) = rest.split_once(':').unwrap_or((rest, ""));
            let id: ListingId = id
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("bad listing id in seed: {id}")))?;
            let seller = Uuid::parse_str(seller.trim())
                .map_err(|_| AppError::Config(format!("bad seller id in seed: {seller}")))?;
            listings.insert(id, (Some(seller), title.trim().to_string()));
        }
        Ok(Self {
            listings: Arc::new(RwLock::new(listings)),
        })
    }

    pub async fn insert(&self, listing_id: ListingId, seller_id: Option<Uuid>, title: &str) {
        self.listings
            .write()
            .await
            .insert(listing_id, (seller_id, title.to_string()));
    }
}

#[async_trait]
impl ListingDirectory for InMemoryListingDirectory {
    async fn listing(&self, listing_id: ListingId) -> AppResult<ListingSummary> {
        let guard = self.listings.read().await;
        match guard.get(&listing_id) {
            Some((Some(seller_id), title)) => Ok(ListingSummary {
                id: listing_id,
                seller_id: *seller_id,
                title: title.clone(),
            }),
            Some((None, _)) => Err(AppError::not_found(format!(
                "seller of listing {listing_id}"
            ))),
            None => Err(AppError::not_found(format!("listing {listing_id}"))),
        }
    }
}
