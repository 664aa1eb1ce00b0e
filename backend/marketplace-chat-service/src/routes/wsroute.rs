use crate::error::AppError;
use crate::middleware::auth::verify_token;
use crate::models::{Conversation, Message};
use crate::realtime::{ChangeHandler, ChangeKind, ChangeRecord, Filter, Subscription, Table};
use crate::state::AppState;
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{get, http::header, web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use async_trait::async_trait;
use futures::channel::mpsc;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
    /// Also stream message changes for this conversation.
    pub conversation_id: Option<Uuid>,
}

/// Frame pushed to the client for every row change it is subscribed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub record: serde_json::Value,
}

#[derive(Clone)]
struct Forward(mpsc::UnboundedSender<WsEvent>);

impl Forward {
    fn push<T: ChangeRecord>(&self, kind: ChangeKind, record: T) {
        let record = match serde_json::to_value(&record) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(table = %T::TABLE, error = %e, "failed to encode ws event");
                return;
            }
        };
        // closed means the session already stopped
        let _ = self.0.unbounded_send(WsEvent {
            table: T::TABLE,
            kind,
            record,
        });
    }
}

#[async_trait]
impl<T: ChangeRecord> ChangeHandler<T> for Forward {
    async fn on_insert(&self, record: T) {
        self.push(ChangeKind::Insert, record);
    }
    async fn on_update(&self, record: T) {
        self.push(ChangeKind::Update, record);
    }
    async fn on_delete(&self, record: T) {
        self.push(ChangeKind::Delete, record);
    }
}

struct WsSession {
    user_id: Uuid,
    hb: Instant,
    subscriptions: Vec<Subscription>,
    events: Option<mpsc::UnboundedReceiver<WsEvent>>,
}

impl WsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(user_id = %act.user_id, "websocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            user_id = %self.user_id,
            subscriptions = self.subscriptions.len(),
            "websocket session started"
        );
        self.hb(ctx);
        if let Some(events) = self.events.take() {
            ctx.add_stream(events);
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(user_id = %self.user_id, "websocket session stopped");
        let subscriptions = std::mem::take(&mut self.subscriptions);
        actix::spawn(async move {
            for subscription in subscriptions {
                subscription.unsubscribe().await;
            }
        });
    }
}

impl StreamHandler<WsEvent> for WsSession {
    fn handle(&mut self, event: WsEvent, ctx: &mut Self::Context) {
        match serde_json::to_string(&event) {
            Ok(text) => ctx.text(text),
            Err(e) => tracing::warn!(error = %e, "failed to serialize ws event"),
        }
    }

    // all forwarders gone; the socket itself stays up until the client leaves
    fn finished(&mut self, _ctx: &mut Self::Context) {}
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(_)) => {
                // the socket is push-only; writes go through the REST API
                self.hb = Instant::now();
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("binary websocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(?reason, "websocket close received");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}

fn bearer_token(params: &WsParams, req: &HttpRequest) -> Option<String> {
    params.token.clone().or_else(|| {
        req.headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(str::to_string)
    })
}

/// Open the live feed for the caller: their notifications, conversations
/// they take part in and, with `conversation_id`, that conversation's
/// messages.
async fn open_subscriptions(
    state: &AppState,
    user_id: Uuid,
    conversation_id: Option<Uuid>,
    forward: Forward,
) -> Result<Vec<Subscription>, AppError> {
    let services = &state.services;

    if let Some(conversation_id) = conversation_id {
        services
            .conversations
            .open_existing(conversation_id, user_id)
            .await?;
    }

    let mut subscriptions = vec![
        services.notifications.subscribe(user_id, forward.clone()).await,
        services
            .feed
            .subscribe::<Conversation, _>(
                Filter::table(Table::Conversations).eq("buyer_id", user_id),
                forward.clone(),
            )
            .await,
        services
            .feed
            .subscribe::<Conversation, _>(
                Filter::table(Table::Conversations).eq("seller_id", user_id),
                forward.clone(),
            )
            .await,
    ];

    if let Some(conversation_id) = conversation_id {
        subscriptions.push(
            services
                .feed
                .subscribe::<Message, _>(
                    Filter::table(Table::Messages).eq("conversation_id", conversation_id),
                    forward,
                )
                .await,
        );
    }
    Ok(subscriptions)
}

#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, actix_web::Error> {
    let params = query.into_inner();

    let token = bearer_token(&params, &req).ok_or(AppError::Unauthorized)?;
    let (user_id, claims) = verify_token(&state.config.jwt_secret, &token)?;
    state
        .token_metadata
        .observe(user_id.0, claims.name.as_deref())
        .await;

    let (tx, rx) = mpsc::unbounded();
    let subscriptions =
        open_subscriptions(&state, user_id.0, params.conversation_id, Forward(tx)).await?;

    let session = WsSession {
        user_id: user_id.0,
        hb: Instant::now(),
        subscriptions,
        events: Some(rx),
    };
    ws::start(session, &req, stream)
}

