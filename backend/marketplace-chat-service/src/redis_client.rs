use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{Client, RedisResult};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct RedisClient {
    client: Client,
    manager: Arc<Mutex<ConnectionManager>>,
}

impl RedisClient {
    pub async fn from_url(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            manager: Arc::new(Mutex::new(manager)),
        })
    }

    /// Shared auto-reconnecting connection for short commands.
    pub async fn get_multiplexed_async_connection(&self) -> RedisResult<ConnectionManager> {
        let guard = self.manager.lock().await;
        Ok(guard.clone())
    }

    /// Fresh connection for blocking reads (`XREAD BLOCK`) so they do not
    /// stall the shared one.
    pub async fn dedicated_connection(&self) -> RedisResult<MultiplexedConnection> {
        self.client.get_multiplexed_tokio_connection().await
    }
}
