use apache_avro::{to_avro_datum, types::Value as AvroValue, Schema};
use async_trait::async_trait;
use event_bus::schema_registry::frame;
use event_bus::{
    BusMessage, DecodeFailure, EventBus, EventEnvelope, InMemoryBus, Publisher, RegistryError,
    SchemaSource, Severity, Subscriber, SubscriberConfig,
};
use std::sync::Arc;
use std::time::Duration;

const SUMMARY_TOPIC: &str = "gemini-summary";
const SUMMARY_SCHEMA_ID: u32 = 7;

const SUMMARY_SCHEMA: &str = r#"{
    "type": "record",
    "name": "HealthSummary",
    "fields": [
        {"name": "health_status", "type": "string"},
        {"name": "total_events", "type": "long"},
        {"name": "error_rate_percent", "type": "double"},
        {"name": "top_error_source", "type": ["null", "string"], "default": null}
    ]
}"#;

/// Registry stand-in that knows a single schema id
struct StaticSchemas {
    schema: Arc<Schema>,
}

impl StaticSchemas {
    fn new() -> Self {
        Self {
            schema: Arc::new(Schema::parse_str(SUMMARY_SCHEMA).unwrap()),
        }
    }
}

#[async_trait]
impl SchemaSource for StaticSchemas {
    async fn schema_by_id(&self, id: u32) -> Result<Arc<Schema>, RegistryError> {
        if id == SUMMARY_SCHEMA_ID {
            Ok(self.schema.clone())
        } else {
            Err(RegistryError::SchemaNotFound { id })
        }
    }
}

fn framed_summary(status: &str, total: i64) -> Vec<u8> {
    let schema = Schema::parse_str(SUMMARY_SCHEMA).unwrap();
    let record = AvroValue::Record(vec![
        ("health_status".to_string(), AvroValue::String(status.to_string())),
        ("total_events".to_string(), AvroValue::Long(total)),
        ("error_rate_percent".to_string(), AvroValue::Double(12.5)),
        (
            "top_error_source".to_string(),
            AvroValue::Union(1, Box::new(AvroValue::String("datadog".to_string()))),
        ),
    ]);
    frame(SUMMARY_SCHEMA_ID, &to_avro_datum(&schema, record).unwrap())
}

fn config(group: &str, from_earliest: bool) -> SubscriberConfig {
    SubscriberConfig {
        topic: SUMMARY_TOPIC.to_string(),
        group_id: group.to_string(),
        from_earliest,
    }
}

fn message(payload: &[u8]) -> BusMessage {
    BusMessage::new(SUMMARY_TOPIC.to_string(), payload.to_vec())
}

#[tokio::test]
async fn test_replaying_subscribers_never_share_a_group() {
    let bus = Arc::new(InMemoryBus::new());

    let first = Subscriber::new(bus.clone(), config("api-summary-reader", true));
    let second = Subscriber::new(bus.clone(), config("api-summary-reader", true));

    assert_ne!(first.group_id(), second.group_id());
    assert!(first.group_id().starts_with("api-summary-reader-"));
    assert!(first.from_earliest());
}

#[tokio::test]
async fn test_live_subscriber_keeps_stable_group() {
    let bus = Arc::new(InMemoryBus::new());
    let subscriber = Subscriber::new(bus, config("demo-app-consumer", false));
    assert_eq!(subscriber.group_id(), "demo-app-consumer");
    assert!(!subscriber.from_earliest());
}

#[tokio::test]
async fn test_second_replay_sees_records_the_first_already_read() {
    let bus = InMemoryBus::new();
    bus.publish(SUMMARY_TOPIC, "s1", br#"{"health_status":"healthy"}"#.to_vec())
        .await
        .unwrap();

    let mut first = Subscriber::new(Arc::new(bus.clone()), config("history", true));
    assert!(first.poll(Duration::from_millis(50)).await.unwrap().is_some());
    first.close().await.unwrap();

    let mut second = Subscriber::new(Arc::new(bus.clone()), config("history", true));
    let replayed = second.poll(Duration::from_millis(50)).await.unwrap();
    assert!(replayed.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_poll_returns_none_within_timeout() {
    let bus = Arc::new(InMemoryBus::new());
    let mut subscriber = Subscriber::new(bus, config("demo-app-consumer", false));

    let started = tokio::time::Instant::now();
    let polled = subscriber.poll(Duration::from_secs(1)).await.unwrap();

    assert!(polled.is_none());
    assert!(started.elapsed() <= Duration::from_secs(1));
    assert!(subscriber.is_connected());
}

#[tokio::test]
async fn test_live_subscriber_skips_history() {
    let bus = InMemoryBus::new();
    bus.publish(SUMMARY_TOPIC, "old", br#"{"health_status":"old"}"#.to_vec())
        .await
        .unwrap();

    let mut subscriber = Subscriber::new(Arc::new(bus.clone()), config("live", false));
    assert!(subscriber.poll(Duration::from_millis(20)).await.unwrap().is_none());

    bus.publish(SUMMARY_TOPIC, "new", br#"{"health_status":"new"}"#.to_vec())
        .await
        .unwrap();
    let msg = subscriber.poll(Duration::from_millis(50)).await.unwrap().unwrap();
    let summary = subscriber.decode(&msg).await.unwrap();
    assert_eq!(summary.health_status(), Some("new"));
}

#[tokio::test]
async fn test_registry_decode_preferred() {
    let bus = Arc::new(InMemoryBus::new());
    let subscriber = Subscriber::new(bus, config("g", false))
        .with_schema_source(Arc::new(StaticSchemas::new()));

    let summary = subscriber
        .decode(&message(&framed_summary("degraded", 42)))
        .await
        .unwrap();

    assert_eq!(summary.health_status(), Some("degraded"));
    assert_eq!(summary.get("total_events"), Some(&serde_json::json!(42)));
    assert_eq!(summary.get("top_error_source"), Some(&serde_json::json!("datadog")));
    assert_eq!(subscriber.stats().snapshot().registry, 1);
}

#[tokio::test]
async fn test_text_fallback_with_registry_configured() {
    let bus = Arc::new(InMemoryBus::new());
    let subscriber = Subscriber::new(bus, config("g", false))
        .with_schema_source(Arc::new(StaticSchemas::new()));

    let summary = subscriber
        .decode(&message(br#"{"health_status":"healthy","anomaly_count":0}"#))
        .await
        .unwrap();

    assert_eq!(summary.health_status(), Some("healthy"));
    let stats = subscriber.stats().snapshot();
    assert_eq!(stats.text, 1);
    assert_eq!(stats.registry, 0);
}

#[tokio::test]
async fn test_framed_payload_without_registry_is_foreign() {
    let bus = Arc::new(InMemoryBus::new());
    let subscriber = Subscriber::new(bus, config("g", false));

    let failure = subscriber
        .try_decode(&message(&framed_summary("critical", 3)))
        .await
        .unwrap_err();

    assert!(matches!(failure, DecodeFailure::ForeignFormat { .. }));
    assert_eq!(failure.kind(), "foreign");
}

#[tokio::test]
async fn test_unknown_schema_id_is_corrupt() {
    let bus = Arc::new(InMemoryBus::new());
    let subscriber = Subscriber::new(bus, config("g", false))
        .with_schema_source(Arc::new(StaticSchemas::new()));

    let payload = frame(99, &[1, 2, 3]);
    let failure = subscriber.try_decode(&message(&payload)).await.unwrap_err();
    assert!(matches!(failure, DecodeFailure::Corrupt { .. }));

    assert!(subscriber.decode(&message(&payload)).await.is_none());
    assert_eq!(subscriber.stats().snapshot().corrupt, 2);
}

#[tokio::test]
async fn test_empty_and_non_object_payloads_are_skipped() {
    let bus = Arc::new(InMemoryBus::new());
    let subscriber = Subscriber::new(bus, config("g", false));

    assert!(subscriber.decode(&message(b"")).await.is_none());
    assert!(subscriber.decode(&message(b"[1,2]")).await.is_none());
    assert!(subscriber.decode(&message(b"not json")).await.is_none());

    let stats = subscriber.stats().snapshot();
    assert_eq!(stats.empty, 1);
    assert_eq!(stats.foreign, 2);
    assert_eq!(stats.failures(), 3);
}

#[tokio::test]
async fn test_published_envelopes_arrive_in_call_order() {
    let bus = InMemoryBus::new();
    let publisher = Publisher::new(
        Arc::new(bus.clone()),
        "cloudevents-stream",
        Duration::from_secs(1),
    );
    let mut reader = Subscriber::new(
        Arc::new(bus.clone()),
        SubscriberConfig {
            topic: "cloudevents-stream".to_string(),
            group_id: "order-check".to_string(),
            from_earliest: true,
        },
    );

    let first = EventEnvelope::simulated("kubernetes", "io.k8s.pod.crash")
        .with_severity(Severity::Critical);
    let second = EventEnvelope::simulated("pagerduty", "com.pagerduty.incident.triggered")
        .with_severity(Severity::Critical);
    publisher.publish(&first).await.unwrap();
    publisher.publish(&second).await.unwrap();

    let a = reader.poll(Duration::from_millis(50)).await.unwrap().unwrap();
    let b = reader.poll(Duration::from_millis(50)).await.unwrap().unwrap();
    assert_eq!(a.key.as_deref(), Some(first.id.as_str()));
    assert_eq!(b.key.as_deref(), Some(second.id.as_str()));
    assert!(a.offset < b.offset);
    assert_eq!(event_bus::codec::decode(&b.payload).unwrap(), second);
}
