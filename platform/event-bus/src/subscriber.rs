//! Reader for the derived summary stream
//!
//! Two decisions shape this type:
//!
//! 1. **Group identity.** A replay from the earliest offset uses a fresh,
//!    time-suffixed group so it never inherits offsets committed by the
//!    long-lived "latest" reader. A live reader uses the stable group as
//!    given, so restarts continue as one logical consumer.
//! 2. **Decoding.** Registry-framed Avro is tried first when a schema source
//!    is configured, JSON text second. A record neither decoder accepts is
//!    skipped by the caller, but the reason is counted in [`DecodeStats`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::schema_registry::{decode_framed, SchemaSource};
use crate::{
    BusConnector, BusMessage, BusResult, ConsumerOptions, LogConsumer, StartPosition,
};

/// Decoded health snapshot from the summary stream
///
/// No schema is enforced beyond "a JSON object". Typical keys:
/// `health_status`, `total_events`, `critical_count`, `error_count`,
/// `warning_count`, `error_rate_percent`, `error_trend`, `top_error_source`,
/// `anomaly_count`, plus `ai_insight` once augmented.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SummaryRecord(Map<String, Value>);

impl SummaryRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// The `health_status` field, when it is a string
    pub fn health_status(&self) -> Option<&str> {
        self.0.get("health_status").and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for SummaryRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Why a message could not be turned into a [`SummaryRecord`]
#[derive(Debug, thiserror::Error)]
pub enum DecodeFailure {
    #[error("message has no payload")]
    EmptyPayload,

    /// Neither registry framed nor JSON: most likely not ours
    #[error("payload is not a known format: {text_error}")]
    ForeignFormat { text_error: String },

    /// Registry framed but undecodable, and not JSON either
    #[error("registry decode failed ({registry_error}); text decode failed ({text_error})")]
    Corrupt {
        registry_error: String,
        text_error: String,
    },
}

impl DecodeFailure {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeFailure::EmptyPayload => "empty",
            DecodeFailure::ForeignFormat { .. } => "foreign",
            DecodeFailure::Corrupt { .. } => "corrupt",
        }
    }
}

/// Per-subscriber decode counters
#[derive(Debug, Default)]
pub struct DecodeStats {
    registry: AtomicU64,
    text: AtomicU64,
    empty: AtomicU64,
    foreign: AtomicU64,
    corrupt: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStatsSnapshot {
    pub registry: u64,
    pub text: u64,
    pub empty: u64,
    pub foreign: u64,
    pub corrupt: u64,
}

impl DecodeStatsSnapshot {
    pub fn failures(&self) -> u64 {
        self.empty + self.foreign + self.corrupt
    }
}

impl DecodeStats {
    pub fn snapshot(&self) -> DecodeStatsSnapshot {
        DecodeStatsSnapshot {
            registry: self.registry.load(Ordering::Relaxed),
            text: self.text.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            foreign: self.foreign.load(Ordering::Relaxed),
            corrupt: self.corrupt.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub topic: String,
    /// Base consumer-group identity
    pub group_id: String,
    pub from_earliest: bool,
}

/// Lazily connected reader of one topic
pub struct Subscriber {
    connector: Arc<dyn BusConnector>,
    topic: String,
    group_id: String,
    start: StartPosition,
    schema_source: Option<Arc<dyn SchemaSource>>,
    // Only touched through &mut self; the Mutex makes Subscriber Sync
    consumer: Option<Mutex<Box<dyn LogConsumer>>>,
    stats: Arc<DecodeStats>,
}

fn replay_group_id(base: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", base, Utc::now().timestamp_millis(), &suffix[..8])
}

impl Subscriber {
    pub fn new(connector: Arc<dyn BusConnector>, config: SubscriberConfig) -> Self {
        let (group_id, start) = if config.from_earliest {
            (replay_group_id(&config.group_id), StartPosition::Earliest)
        } else {
            (config.group_id, StartPosition::Latest)
        };

        Self {
            connector,
            topic: config.topic,
            group_id,
            start,
            schema_source: None,
            consumer: None,
            stats: Arc::new(DecodeStats::default()),
        }
    }

    /// Enable registry-framed Avro decoding
    pub fn with_schema_source(mut self, source: Arc<dyn SchemaSource>) -> Self {
        self.schema_source = Some(source);
        self
    }

    /// Effective consumer-group identity
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn from_earliest(&self) -> bool {
        self.start == StartPosition::Earliest
    }

    pub fn uses_registry(&self) -> bool {
        self.schema_source.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.consumer.is_some()
    }

    pub fn stats(&self) -> Arc<DecodeStats> {
        self.stats.clone()
    }

    async fn open_consumer(&self) -> BusResult<Box<dyn LogConsumer>> {
        let bus = self.connector.connect().await?;
        let consumer = bus
            .consumer(
                &self.topic,
                ConsumerOptions {
                    group_id: self.group_id.clone(),
                    start: self.start,
                },
            )
            .await?;

        tracing::info!(
            topic = %self.topic,
            group_id = %self.group_id,
            offset = if self.from_earliest() { "earliest" } else { "latest" },
            avro = self.uses_registry(),
            "Summary consumer initialized"
        );
        Ok(consumer)
    }

    /// Wait up to `timeout` for the next message
    ///
    /// Connects on first use; the connect attempt counts against the same
    /// timeout. Returns `Ok(None)` when nothing arrived in time.
    pub async fn poll(&mut self, timeout: Duration) -> BusResult<Option<BusMessage>> {
        let deadline = Instant::now() + timeout;

        if self.consumer.is_none() {
            let opened = tokio::time::timeout_at(deadline, self.open_consumer()).await;
            match opened {
                Err(_) => return Ok(None),
                Ok(consumer) => self.consumer = Some(Mutex::new(consumer?)),
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.consumer.as_mut() {
            Some(consumer) => consumer.get_mut().poll(remaining).await,
            None => Ok(None),
        }
    }

    /// Decode a message, or `None` when it should be skipped
    pub async fn decode(&self, msg: &BusMessage) -> Option<SummaryRecord> {
        match self.try_decode(msg).await {
            Ok(record) => Some(record),
            Err(failure @ DecodeFailure::Corrupt { .. }) => {
                tracing::warn!(
                    topic = %msg.topic,
                    offset = msg.offset,
                    error = %failure,
                    "Skipping undecodable summary"
                );
                None
            }
            Err(failure) => {
                tracing::debug!(
                    topic = %msg.topic,
                    offset = msg.offset,
                    error = %failure,
                    "Skipping foreign or empty message"
                );
                None
            }
        }
    }

    /// Decode a message, reporting why it was rejected
    pub async fn try_decode(&self, msg: &BusMessage) -> Result<SummaryRecord, DecodeFailure> {
        if msg.payload.is_empty() {
            self.stats.empty.fetch_add(1, Ordering::Relaxed);
            return Err(DecodeFailure::EmptyPayload);
        }

        let mut registry_error = None;
        if let Some(source) = &self.schema_source {
            match decode_framed(source.as_ref(), &msg.payload).await {
                Ok(Value::Object(fields)) => {
                    self.stats.registry.fetch_add(1, Ordering::Relaxed);
                    return Ok(SummaryRecord(fields));
                }
                Ok(other) => {
                    registry_error = Some(format!("datum is not a record: {other}"));
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Avro deserialization failed, trying JSON");
                    if e.is_corrupt() {
                        registry_error = Some(e.to_string());
                    }
                }
            }
        }

        match decode_text(&msg.payload) {
            Ok(fields) => {
                self.stats.text.fetch_add(1, Ordering::Relaxed);
                Ok(SummaryRecord(fields))
            }
            Err(text_error) => match registry_error {
                Some(registry_error) => {
                    self.stats.corrupt.fetch_add(1, Ordering::Relaxed);
                    Err(DecodeFailure::Corrupt {
                        registry_error,
                        text_error,
                    })
                }
                None => {
                    self.stats.foreign.fetch_add(1, Ordering::Relaxed);
                    Err(DecodeFailure::ForeignFormat { text_error })
                }
            },
        }
    }

    /// Release the consumer; a later poll reconnects
    pub async fn close(&mut self) -> BusResult<()> {
        if let Some(consumer) = self.consumer.take() {
            consumer.into_inner().close().await?;
            tracing::debug!(topic = %self.topic, group_id = %self.group_id, "Summary consumer closed");
        }
        Ok(())
    }
}

fn decode_text(payload: &[u8]) -> Result<Map<String, Value>, String> {
    let text = std::str::from_utf8(payload).map_err(|e| e.to_string())?;
    match serde_json::from_str::<Value>(text.trim()).map_err(|e| e.to_string())? {
        Value::Object(fields) => Ok(fields),
        other => Err(format!("expected a JSON object, got {other}")),
    }
}
