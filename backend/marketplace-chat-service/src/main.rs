use actix_web::{App, HttpServer};
use anyhow::Context;
use marketplace_chat_service::{
    config::{Config, StorageBackend, StreamsConfig},
    logging,
    middleware::MetricsMiddleware,
    realtime::{streams, ChangeFeed},
    redis_client::RedisClient,
    repository::{InMemoryStore, PgStore},
    routes,
    services::{
        InMemoryListingDirectory, InMemoryProfileDirectory, PgListingDirectory,
        PgProfileDirectory, TokenMetadataCache,
    },
    state::{AppState, Backends, ChatServices},
};
use std::sync::Arc;

const SERVICE_NAME: &str = "marketplace-chat-service";

async fn postgres_backends(cfg: &Config, metadata: TokenMetadataCache) -> anyhow::Result<Backends> {
    let mut db_cfg = db_pool::DbConfig::for_service(SERVICE_NAME);
    db_cfg.database_url = cfg
        .database_url
        .clone()
        .context("DATABASE_URL missing")?;
    db_cfg.log_config();

    let pool = db_pool::create_pool(db_cfg)
        .await
        .context("failed to connect to postgres")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let store = Arc::new(PgStore::new(pool.clone()));
    Ok(Backends {
        conversations: store.clone(),
        messages: store.clone(),
        notifications: store,
        listings: Arc::new(PgListingDirectory::new(pool.clone())),
        profiles: Arc::new(PgProfileDirectory::new(pool)),
        auth_metadata: Arc::new(metadata),
    })
}

fn memory_backends(cfg: &Config, metadata: TokenMetadataCache) -> anyhow::Result<Backends> {
    let listings = match cfg.seed_listings.as_deref() {
        Some(seed) => InMemoryListingDirectory::from_seed(seed)?,
        None => InMemoryListingDirectory::new(),
    };
    tracing::warn!("using in-memory storage; data is lost on restart");

    let store = Arc::new(InMemoryStore::new());
    Ok(Backends {
        conversations: store.clone(),
        messages: store.clone(),
        notifications: store,
        listings: Arc::new(listings),
        profiles: Arc::new(InMemoryProfileDirectory::open()),
        auth_metadata: Arc::new(metadata),
    })
}

/// Bridge the local feed to every other instance through Redis Streams.
async fn start_fanout(
    url: &str,
    feed: &ChangeFeed,
    streams_cfg: &StreamsConfig,
) -> anyhow::Result<RedisClient> {
    let redis = RedisClient::from_url(url)
        .await
        .context("failed to connect to redis")?;

    if let Some(outbound) = feed.attach_outbound() {
        streams::spawn_outbound_forwarder(redis.clone(), outbound, streams_cfg.clone());
    }

    let listener_client = redis.clone();
    let listener_feed = feed.clone();
    let listener_cfg = streams_cfg.clone();
    tokio::spawn(async move {
        if let Err(e) =
            streams::start_streams_listener(listener_client, listener_feed, listener_cfg).await
        {
            tracing::error!(error = %e, "redis streams listener failed");
        }
    });
    Ok(redis)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let cfg = Arc::new(Config::from_env()?);
    tracing::info!(config = ?cfg, "loaded configuration");

    let feed = ChangeFeed::new();
    let token_metadata = TokenMetadataCache::new();

    let backends = match cfg.storage {
        StorageBackend::Postgres => postgres_backends(&cfg, token_metadata.clone()).await?,
        StorageBackend::Memory => memory_backends(&cfg, token_metadata.clone())?,
    };
    let services = ChatServices::build(
        backends,
        feed.clone(),
        cfg.max_message_length,
        cfg.message_preview_chars,
    );

    let redis = match cfg.redis_url.as_deref() {
        Some(url) => Some(start_fanout(url, &feed, &cfg.streams).await?),
        None => {
            tracing::info!("REDIS_URL not set; change feed is local to this instance");
            None
        }
    };

    let state = AppState {
        services,
        config: cfg.clone(),
        token_metadata,
        redis,
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, origin = %feed.origin(), "starting {}", SERVICE_NAME);

    HttpServer::new(move || {
        let state = state.clone();
        App::new()
            .wrap(MetricsMiddleware)
            .configure(move |c| routes::configure_app(c, state))
    })
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {bind_addr}"))?
    .run()
    .await
    .context("http server stopped with error")?;

    Ok(())
}
