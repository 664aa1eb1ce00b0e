//! In-process change feed.
//!
//! Writers publish committed rows; each subscription owns an unbounded
//! channel and a task that decodes and hands changes to its handler one at a
//! time, so per-subscription order equals publish order.

pub mod changes;
pub mod streams;

pub use changes::{decode, ChangeKind, ChangeRecord, DecodeError, Filter, RowChange, Table};

use crate::metrics;
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Callbacks for one subscription. Invoked sequentially in arrival order.
#[async_trait]
pub trait ChangeHandler<T: ChangeRecord>: Send + Sync + 'static {
    async fn on_insert(&self, _record: T) {}
    async fn on_update(&self, _record: T) {}
    async fn on_delete(&self, _record: T) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

struct Subscriber {
    id: SubscriberId,
    filter: Filter,
    sender: UnboundedSender<RowChange>,
}

#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<RwLock<HashMap<Table, Vec<Subscriber>>>>,
    origin: Uuid,
    outbound: Arc<OnceCell<UnboundedSender<RowChange>>>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            origin: Uuid::new_v4(),
            outbound: Arc::new(OnceCell::new()),
        }
    }

    /// Identifier stamped on every change published by this instance.
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// Receiver of every locally published change, for the cross-instance
    /// bridge. Only the first caller gets one.
    pub fn attach_outbound(&self) -> Option<UnboundedReceiver<RowChange>> {
        let (tx, rx) = unbounded_channel();
        self.outbound.set(tx).ok().map(|_| rx)
    }

    /// Publish a committed row: local fanout plus the outbound bridge.
    pub async fn publish<T: ChangeRecord>(&self, kind: ChangeKind, record: &T) {
        let record = match serde_json::to_value(record) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(table = %T::TABLE, error = %e, "failed to serialize row change");
                return;
            }
        };
        let change = RowChange {
            table: T::TABLE,
            kind,
            record,
            origin: self.origin,
            committed_at: Utc::now(),
        };

        if let Some(outbound) = self.outbound.get() {
            if outbound.send(change.clone()).is_err() {
                tracing::warn!(table = %change.table, "outbound bridge closed, change not forwarded");
            }
        }

        self.deliver(change).await;
    }

    /// Local fanout only. Used for changes that arrive from other instances.
    /// Subscribers whose receiving side is gone are dropped here.
    pub async fn deliver(&self, change: RowChange) {
        let mut guard = self.inner.write().await;
        let Some(subscribers) = guard.get_mut(&change.table) else {
            return;
        };

        let before = subscribers.len();
        let mut delivered = 0usize;
        subscribers.retain(|subscriber| {
            if subscriber.filter.matches(&change) {
                let ok = subscriber.sender.send(change.clone()).is_ok();
                if ok {
                    delivered += 1;
                }
                ok
            } else {
                !subscriber.sender.is_closed()
            }
        });

        let after = subscribers.len();
        if before != after {
            tracing::debug!(
                table = %change.table,
                reaped = before - after,
                active = after,
                "removed dead change subscribers"
            );
        }
        if subscribers.is_empty() {
            guard.remove(&change.table);
        }
        metrics::record_feed_delivery(change.table.as_str(), delivered);
    }

    /// Register a raw channel. Prefer [`ChangeFeed::subscribe`], which decodes.
    async fn add_subscriber(&self, filter: Filter) -> (SubscriberId, UnboundedReceiver<RowChange>) {
        let (tx, rx) = unbounded_channel();
        let id = SubscriberId::new();
        let table = filter.table;

        let mut guard = self.inner.write().await;
        guard.entry(table).or_default().push(Subscriber {
            id,
            filter,
            sender: tx,
        });

        tracing::debug!(
            subscriber = ?id,
            table = %table,
            total = guard.get(&table).map(|v| v.len()).unwrap_or(0),
            "added change subscriber"
        );
        (id, rx)
    }

    async fn remove_subscriber(&self, table: Table, id: SubscriberId) {
        let mut guard = self.inner.write().await;
        if let Some(subscribers) = guard.get_mut(&table) {
            subscribers.retain(|s| s.id != id);
            if subscribers.is_empty() {
                guard.remove(&table);
            }
        }
    }

    /// Subscribe `handler` to changes matching `filter`. The subscription is
    /// live once this returns.
    pub async fn subscribe<T, H>(&self, filter: Filter, handler: H) -> Subscription
    where
        T: ChangeRecord,
        H: ChangeHandler<T>,
    {
        debug_assert_eq!(filter.table, T::TABLE, "filter table must match record type");
        let table = filter.table;
        let (id, mut rx) = self.add_subscriber(filter).await;

        let task = tokio::spawn(async move {
            let _gauge = GaugeGuard::open(table);
            while let Some(change) = rx.recv().await {
                match decode::<T>(&change) {
                    Ok(record) => match change.kind {
                        ChangeKind::Insert => handler.on_insert(record).await,
                        ChangeKind::Update => handler.on_update(record).await,
                        ChangeKind::Delete => handler.on_delete(record).await,
                    },
                    Err(e) => {
                        metrics::record_decode_failure(table.as_str());
                        tracing::warn!(table = %table, error = %e, "dropping undecodable row change");
                    }
                }
            }
        });

        Subscription {
            id,
            table,
            feed: self.clone(),
            task: Some(task),
        }
    }

    pub async fn subscriber_count(&self, table: Table) -> usize {
        let guard = self.inner.read().await;
        guard.get(&table).map(|v| v.len()).unwrap_or(0)
    }
}

struct GaugeGuard(Table);

impl GaugeGuard {
    fn open(table: Table) -> Self {
        metrics::subscription_opened(table.as_str());
        Self(table)
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        metrics::subscription_closed(self.0.as_str());
    }
}

/// Live subscription. Release it with [`Subscription::unsubscribe`]; a
/// dropped handle stops delivery and is reaped on the next fanout.
pub struct Subscription {
    id: SubscriberId,
    table: Table,
    feed: ChangeFeed,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub async fn unsubscribe(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.feed.remove_subscriber(self.table, self.id).await;
        tracing::debug!(subscriber = ?self.id, table = %self.table, "unsubscribed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::warn!(
                subscriber = ?self.id,
                table = %self.table,
                "subscription dropped without unsubscribe"
            );
            task.abort();
        }
    }
}
