use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts,
    TextEncoder,
};

fn register<C: prometheus::core::Collector + Clone + 'static>(collector: C, name: &str) -> C {
    if let Err(e) = prometheus::default_registry().register(Box::new(collector.clone())) {
        tracing::warn!(metric = name, error = %e, "metric registration failed");
    }
    collector
}

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_http_requests_total",
            "Total HTTP requests handled by marketplace-chat-service",
        ),
        &["method", "path", "status"],
    )
    .expect("failed to create chat_http_requests_total");
    register(counter, "chat_http_requests_total")
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "chat_http_request_duration_seconds",
            "HTTP request latency for marketplace-chat-service",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["method", "path", "status"],
    )
    .expect("failed to create chat_http_request_duration_seconds");
    register(histogram, "chat_http_request_duration_seconds")
});

static MESSAGES_SENT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("chat_messages_sent_total", "Messages appended")
        .expect("failed to create chat_messages_sent_total");
    register(counter, "chat_messages_sent_total")
});

static MESSAGES_DELETED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("chat_messages_deleted_total", "Messages deleted by sender")
        .expect("failed to create chat_messages_deleted_total");
    register(counter, "chat_messages_deleted_total")
});

static CONVERSATIONS_CREATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("chat_conversations_created_total", "Conversations created")
        .expect("failed to create chat_conversations_created_total");
    register(counter, "chat_conversations_created_total")
});

static NOTIFICATIONS_CREATED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("chat_notifications_created_total", "Notifications created"),
        &["kind"],
    )
    .expect("failed to create chat_notifications_created_total");
    register(counter, "chat_notifications_created_total")
});

static FEED_DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_feed_deliveries_total",
            "Row changes handed to local subscribers",
        ),
        &["table"],
    )
    .expect("failed to create chat_feed_deliveries_total");
    register(counter, "chat_feed_deliveries_total")
});

static FEED_DECODE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_feed_decode_failures_total",
            "Row changes rejected by the validating decoder",
        ),
        &["table"],
    )
    .expect("failed to create chat_feed_decode_failures_total");
    register(counter, "chat_feed_decode_failures_total")
});

static FEED_ACTIVE_SUBSCRIPTIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new(
            "chat_feed_active_subscriptions",
            "Live change-feed subscriptions",
        ),
        &["table"],
    )
    .expect("failed to create chat_feed_active_subscriptions");
    register(gauge, "chat_feed_active_subscriptions")
});

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status_label])
        .observe(elapsed.as_secs_f64());
}

pub fn record_message_sent() {
    MESSAGES_SENT_TOTAL.inc();
}

pub fn record_message_deleted() {
    MESSAGES_DELETED_TOTAL.inc();
}

pub fn record_conversation_created() {
    CONVERSATIONS_CREATED_TOTAL.inc();
}

pub fn record_notification_created(kind: &str) {
    NOTIFICATIONS_CREATED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_feed_delivery(table: &str, count: usize) {
    FEED_DELIVERIES_TOTAL
        .with_label_values(&[table])
        .inc_by(count as u64);
}

pub fn record_decode_failure(table: &str) {
    FEED_DECODE_FAILURES_TOTAL.with_label_values(&[table]).inc();
}

pub fn subscription_opened(table: &str) {
    FEED_ACTIVE_SUBSCRIPTIONS.with_label_values(&[table]).inc();
}

pub fn subscription_closed(table: &str) {
    FEED_ACTIVE_SUBSCRIPTIONS.with_label_values(&[table]).dec();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
