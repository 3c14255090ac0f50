//! End-to-end tests for the webhook engine against a mock HTTP endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use careline_events::EventSource;
use careline_store::MemoryStore;
use careline_webhooks::{
    DeliveryStatus, EngineConfig, NewSubscriber, Notifier, Severity, SubscriberUpdate,
    WebhookEngine, signature,
};

/// Notifier that records every escalation for assertions.
#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<(String, String, Severity)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, message: &str, severity: Severity) {
        self.calls
            .lock()
            .await
            .push((title.to_string(), message.to_string(), severity));
    }
}

fn engine(notifier: Arc<RecordingNotifier>, inline_threshold: usize) -> WebhookEngine {
    let config = EngineConfig::new(EventSource::new("Careline", "2.4.1", "test"))
        .inline_threshold(inline_threshold);
    WebhookEngine::new(MemoryStore::shared(), notifier, config)
}

/// Pulls every waiting delivery's next attempt into the past, so the next
/// `process_queue` pass picks it up without sleeping through the backoff.
async fn force_due(engine: &WebhookEngine) {
    let past = Utc::now() - Duration::seconds(1);
    for delivery in engine.deliveries().list().await.unwrap() {
        if matches!(
            delivery.status,
            DeliveryStatus::Pending | DeliveryStatus::Retry
        ) {
            engine
                .deliveries()
                .reschedule(&delivery.id, past)
                .await
                .unwrap();
        }
    }
}

#[tokio::test]
async fn fire_event_without_matching_subscriber_creates_nothing() {
    let engine = engine(Arc::new(RecordingNotifier::default()), 0);

    engine
        .register_webhook(NewSubscriber::new("https://example.com/hook").events(["a.created"]))
        .await
        .unwrap();

    engine.fire_event("x.y", json!({}), Value::Null).await;

    assert!(engine.deliveries().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn fire_event_with_wildcard_subscriber_queues_one_pending_delivery() {
    let engine = engine(Arc::new(RecordingNotifier::default()), 0);

    let subscriber = engine
        .register_webhook(NewSubscriber::new("https://example.com/hook"))
        .await
        .unwrap();

    engine
        .fire_event("a.created", json!({ "complaint_id": "C-9" }), Value::Null)
        .await;

    let deliveries = engine.deliveries().list().await.unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, DeliveryStatus::Pending);
    assert_eq!(deliveries[0].attempts, 0);
    assert_eq!(deliveries[0].subscriber_id, subscriber.id);
    assert_eq!(deliveries[0].payload["event"], "a.created");
}

#[tokio::test]
async fn shallow_queue_sends_inline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("received"))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(Arc::new(RecordingNotifier::default()), 10);
    let subscriber = engine
        .register_webhook(NewSubscriber::new(format!("{}/hook", server.uri())))
        .await
        .unwrap();

    engine
        .fire_event("complaint.created", json!({ "complaint_id": "C-1" }), Value::Null)
        .await;

    // Delivered synchronously, no process_queue pass needed.
    let deliveries = engine.deliveries().list().await.unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, DeliveryStatus::Sent);
    assert_eq!(deliveries[0].attempts, 1);
    assert_eq!(deliveries[0].response_code, Some(200));
    assert_eq!(deliveries[0].response_body_excerpt.as_deref(), Some("received"));

    let stats = engine.get_webhook_stats(Some(&subscriber.id)).await.unwrap();
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.failure_count, 0);
}

#[tokio::test]
async fn request_carries_signature_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let engine = engine(Arc::new(RecordingNotifier::default()), 10);
    let subscriber = engine
        .register_webhook(
            NewSubscriber::new(format!("{}/hook", server.uri()))
                .header("X-Team", "quality")
                .header("X-Ward", "intake"),
        )
        .await
        .unwrap();

    engine
        .fire_event(
            "complaint.created",
            json!({ "complaint_id": "C-1" }),
            json!({ "actor": "intake-form" }),
        )
        .await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    let header = |name: &str| {
        request
            .headers
            .get(name)
            .expect(name)
            .to_str()
            .unwrap()
            .to_string()
    };

    assert_eq!(header("Content-Type"), "application/json");
    assert_eq!(header("User-Agent"), "Careline-Webhook/1.0");
    assert_eq!(header("X-Webhook-ID"), subscriber.id);
    assert_eq!(header("X-Team"), "quality");
    assert_eq!(header("X-Ward"), "intake");

    let delivery = &engine.deliveries().list().await.unwrap()[0];
    assert_eq!(header("X-Delivery-ID"), delivery.id);

    // The signature verifies against the raw body with the subscriber's
    // secret, and the body is the event envelope.
    let signature_header = header("X-Signature");
    assert!(signature_header.starts_with("sha256="));
    assert!(signature::verify_body(
        &request.body,
        &signature_header,
        &subscriber.secret
    ));

    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["event"], "complaint.created");
    assert_eq!(body["data"]["complaint_id"], "C-1");
    assert_eq!(body["context"]["actor"], "intake-form");
    assert_eq!(body["source"]["application"], "Careline");

    let timestamp: i64 = header("X-Timestamp").parse().unwrap();
    assert_eq!(timestamp, body["timestamp"].as_i64().unwrap());
}

#[tokio::test]
async fn failing_endpoint_recovers_on_third_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let engine = engine(Arc::new(RecordingNotifier::default()), 0);
    engine
        .register_webhook(NewSubscriber::new(format!("{}/hook", server.uri())).retry_attempts(3))
        .await
        .unwrap();

    engine.fire_event("a.created", json!({}), Value::Null).await;

    // First attempt fails, schedules a retry with backoff.
    assert_eq!(engine.process_queue().await.unwrap(), 1);
    let delivery = &engine.deliveries().list().await.unwrap()[0];
    assert_eq!(delivery.status, DeliveryStatus::Retry);
    assert_eq!(delivery.attempts, 1);
    assert_eq!(delivery.last_error.as_deref(), Some("HTTP 500"));
    assert!(delivery.next_attempt_at > Utc::now() + Duration::seconds(100));

    // Second attempt fails too.
    force_due(&engine).await;
    assert_eq!(engine.process_queue().await.unwrap(), 1);
    let delivery = &engine.deliveries().list().await.unwrap()[0];
    assert_eq!(delivery.status, DeliveryStatus::Retry);
    assert_eq!(delivery.attempts, 2);

    // Third attempt lands.
    force_due(&engine).await;
    assert_eq!(engine.process_queue().await.unwrap(), 1);
    let delivery = &engine.deliveries().list().await.unwrap()[0];
    assert_eq!(delivery.status, DeliveryStatus::Sent);
    assert_eq!(delivery.attempts, 3);
    assert_eq!(delivery.response_code, Some(200));
}

#[tokio::test]
async fn exhausted_attempts_escalate_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let notifier = Arc::new(RecordingNotifier::default());
    let engine = engine(notifier.clone(), 0);
    let subscriber = engine
        .register_webhook(NewSubscriber::new(format!("{}/hook", server.uri())).retry_attempts(2))
        .await
        .unwrap();

    engine.fire_event("a.created", json!({}), Value::Null).await;

    assert_eq!(engine.process_queue().await.unwrap(), 1);
    force_due(&engine).await;
    assert_eq!(engine.process_queue().await.unwrap(), 1);

    let delivery = &engine.deliveries().list().await.unwrap()[0];
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.attempts, 2);

    // Nothing left to claim.
    force_due(&engine).await;
    assert_eq!(engine.process_queue().await.unwrap(), 0);

    let calls = notifier.calls.lock().await;
    assert_eq!(calls.len(), 1);
    let (title, message, severity) = &calls[0];
    assert_eq!(title, "Webhook delivery failed");
    assert_eq!(*severity, Severity::Error);
    assert!(message.contains(&subscriber.id));
    assert!(message.contains(&subscriber.url));
    assert!(message.contains("2 attempts"));

    let stats = engine.get_webhook_stats(Some(&subscriber.id)).await.unwrap();
    assert_eq!(stats.failure_count, 1);
    assert_eq!(stats.success_rate(), 0.0);
}

#[tokio::test]
async fn concurrent_queue_passes_attempt_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_delay(std::time::Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(Arc::new(RecordingNotifier::default()), 0);
    engine
        .register_webhook(NewSubscriber::new(format!("{}/hook", server.uri())))
        .await
        .unwrap();

    engine.fire_event("a.created", json!({}), Value::Null).await;

    let (first, second) = tokio::join!(engine.process_queue(), engine.process_queue());
    assert_eq!(first.unwrap() + second.unwrap(), 1);

    let delivery = &engine.deliveries().list().await.unwrap()[0];
    assert_eq!(delivery.status, DeliveryStatus::Sent);
    assert_eq!(delivery.attempts, 1);

    // The mock's expect(1) also verifies the endpoint saw a single request.
}

#[tokio::test]
async fn test_webhook_runs_for_disabled_subscriber() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(Arc::new(RecordingNotifier::default()), 0);
    let subscriber = engine
        .register_webhook(NewSubscriber::new(format!("{}/hook", server.uri())).disabled())
        .await
        .unwrap();

    let delivery = engine.test_webhook(&subscriber.id).await.unwrap();

    assert_eq!(delivery.status, DeliveryStatus::Sent);
    assert_eq!(delivery.attempts, 1);
    assert_eq!(delivery.max_attempts, 1);
    assert_eq!(delivery.payload["event"], "webhook.test");
}

#[tokio::test]
async fn disabled_subscriber_receives_no_fired_events() {
    let engine = engine(Arc::new(RecordingNotifier::default()), 0);
    let subscriber = engine
        .register_webhook(NewSubscriber::new("https://example.com/hook"))
        .await
        .unwrap();

    engine
        .update_webhook(&subscriber.id, SubscriberUpdate::new().enabled(false))
        .await
        .unwrap();

    engine.fire_event("a.created", json!({}), Value::Null).await;
    assert!(engine.deliveries().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn queued_delivery_for_deleted_subscriber_is_closed_out() {
    let engine = engine(Arc::new(RecordingNotifier::default()), 0);
    let subscriber = engine
        .register_webhook(NewSubscriber::new("https://example.com/hook"))
        .await
        .unwrap();

    engine.fire_event("a.created", json!({}), Value::Null).await;
    engine.delete_webhook(&subscriber.id).await.unwrap();

    assert_eq!(engine.process_queue().await.unwrap(), 1);

    let delivery = &engine.deliveries().list().await.unwrap()[0];
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.attempts, 0);
    assert_eq!(delivery.last_error.as_deref(), Some("webhook no longer exists"));
}

#[tokio::test]
async fn transport_failure_schedules_retry() {
    // Nothing listens on this port.
    let engine = engine(Arc::new(RecordingNotifier::default()), 0);
    engine
        .register_webhook(NewSubscriber::new("http://127.0.0.1:9").retry_attempts(3))
        .await
        .unwrap();

    engine.fire_event("a.created", json!({}), Value::Null).await;
    assert_eq!(engine.process_queue().await.unwrap(), 1);

    let delivery = &engine.deliveries().list().await.unwrap()[0];
    assert_eq!(delivery.status, DeliveryStatus::Retry);
    assert_eq!(delivery.attempts, 1);
    assert!(delivery.last_error.is_some());
    assert_eq!(delivery.response_code, None);
}

#[tokio::test]
async fn global_stats_aggregate_across_subscribers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let engine = engine(Arc::new(RecordingNotifier::default()), 10);
    engine
        .register_webhook(NewSubscriber::new(format!("{}/a", server.uri())))
        .await
        .unwrap();
    engine
        .register_webhook(NewSubscriber::new(format!("{}/b", server.uri())))
        .await
        .unwrap();

    engine.fire_event("a.created", json!({}), Value::Null).await;

    let stats = engine.get_webhook_stats(None).await.unwrap();
    assert_eq!(stats.success_count, 2);
    assert_eq!(stats.failure_count, 0);
    assert_eq!(stats.success_rate(), 1.0);
}
