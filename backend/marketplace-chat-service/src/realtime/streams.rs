//! Redis Streams bridge between service instances.
//!
//! Every locally published change is appended to one shared stream; every
//! instance tails that stream and re-delivers changes stamped with another
//! instance's origin.

use super::{ChangeFeed, RowChange};
use crate::config::StreamsConfig;
use crate::redis_client::RedisClient;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

pub const CHANGES_STREAM_KEY: &str = "stream:marketplace-chat:changes";

pub async fn publish_change(
    client: &RedisClient,
    change: &RowChange,
    max_len: usize,
) -> redis::RedisResult<String> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    let payload = serde_json::to_string(change).map_err(|e| {
        redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "serialize row change",
            e.to_string(),
        ))
    })?;

    conn.xadd_maxlen::<_, _, _, _, String>(
        CHANGES_STREAM_KEY,
        StreamMaxlen::Approx(max_len),
        "*",
        &[
            ("origin", change.origin.to_string()),
            ("table", change.table.as_str().to_string()),
            ("payload", payload),
        ],
    )
    .await
}

/// Drain the feed's outbound channel into the stream.
pub fn spawn_outbound_forwarder(
    client: RedisClient,
    mut rx: UnboundedReceiver<RowChange>,
    config: StreamsConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(change) = rx.recv().await {
            if let Err(e) = publish_change(&client, &change, config.max_len).await {
                // Local subscribers already have it; only other instances miss out.
                tracing::warn!(
                    table = %change.table,
                    error = %e,
                    "failed to forward change to redis stream"
                );
            }
        }
        tracing::info!("outbound change forwarder stopped");
    })
}

/// Decode one stream entry into a change that should be delivered locally.
/// `None` for own-origin entries and unreadable payloads.
fn remote_change(feed: &ChangeFeed, payload: Option<String>) -> Option<RowChange> {
    let payload = payload?;
    match serde_json::from_str::<RowChange>(&payload) {
        Ok(change) if change.origin == feed.origin() => None,
        Ok(change) => Some(change),
        Err(e) => {
            tracing::warn!(error = %e, "skipping unreadable stream entry");
            None
        }
    }
}

/// Tail the shared stream from "now" and re-deliver foreign changes.
pub async fn start_streams_listener(
    client: RedisClient,
    feed: ChangeFeed,
    config: StreamsConfig,
) -> redis::RedisResult<()> {
    let mut conn = client.dedicated_connection().await?;
    let mut last_id = "$".to_string();
    let opts = StreamReadOptions::default()
        .block(config.block_ms as usize)
        .count(config.batch_size);

    tracing::info!(
        stream = CHANGES_STREAM_KEY,
        origin = %feed.origin(),
        "change stream listener started"
    );

    loop {
        let read: redis::RedisResult<Option<StreamReadReply>> = conn
            .xread_options(&[CHANGES_STREAM_KEY], &[last_id.as_str()], &opts)
            .await;

        match read {
            Ok(Some(reply)) => {
                for key in reply.keys {
                    for entry in key.ids {
                        let payload: Option<String> = entry.get("payload");
                        last_id = entry.id;
                        if let Some(change) = remote_change(&feed, payload) {
                            feed.deliver(change).await;
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) if e.is_io_error() || e.is_timeout() => {
                time::sleep(Duration::from_millis(100)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "change stream listener error");
                time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
