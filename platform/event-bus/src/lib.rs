//! # Event Log Access
//!
//! Producer and consumer plumbing between the simulation services and the
//! durable event log.
//!
//! ## Layers
//!
//! - **EventBus / LogConsumer**: the broker seam. One publish primitive that
//!   returns only after the log acknowledged the record, and a pull consumer
//!   bound to a consumer group and a start position.
//! - **NatsBus**: production implementation on NATS JetStream
//! - **InMemoryBus**: test/dev implementation with the same group/offset semantics
//! - **Publisher**: lazily connected, flush-per-publish writer of [`EventEnvelope`]s
//! - **Subscriber**: lazily connected reader of the derived summary stream with
//!   registry-framed Avro decode and a JSON text fallback
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{EventEnvelope, InMemoryBus, Publisher, Severity};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = InMemoryBus::new();
//! let publisher = Publisher::new(Arc::new(bus), "cloudevents-stream", Duration::from_secs(5));
//!
//! let envelope = EventEnvelope::new("io.k8s.pod.crash", "https://kubernetes.com/demo")
//!     .with_severity(Severity::Critical)
//!     .with_subject("payment-service crashed (OOM)");
//! publisher.publish(&envelope).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
mod envelope;
mod inmemory_bus;
mod nats_bus;
mod publisher;
pub mod schema_registry;
mod subscriber;

pub use codec::CodecError;
pub use envelope::{EventEnvelope, Severity, SPEC_VERSION};
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::{NatsBus, NatsConnector};
pub use publisher::{PublishError, Publisher};
pub use schema_registry::{RegistryError, SchemaRegistryClient, SchemaSource};
pub use subscriber::{
    DecodeFailure, DecodeStats, DecodeStatsSnapshot, Subscriber, SubscriberConfig, SummaryRecord,
};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A record read back from the event log
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The topic this record was appended to
    pub topic: String,
    /// The routing key the producer attached, if any
    pub key: Option<String>,
    /// The record payload (raw bytes)
    pub payload: Vec<u8>,
    /// Position of the record within its partition
    pub offset: u64,
    /// Partition the record lives in
    pub partition: u32,
}

impl BusMessage {
    /// Create a new message at offset 0 of partition 0
    pub fn new(topic: String, payload: Vec<u8>) -> Self {
        Self {
            topic,
            key: None,
            payload,
            offset: 0,
            partition: 0,
        }
    }

    /// Attach the producer's routing key
    pub fn with_key(mut self, key: String) -> Self {
        self.key = Some(key);
        self
    }

    /// Set the log position of the record
    pub fn with_position(mut self, partition: u32, offset: u64) -> Self {
        self.partition = partition;
        self.offset = offset;
        self
    }
}

/// Where a consumer group starts reading when it has no committed offset yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Replay the whole retained log
    Earliest,
    /// Only records appended after the group attached
    Latest,
}

/// Options for opening a consumer on a topic
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Consumer group identity; members of one group share committed offsets
    pub group_id: String,
    /// Start position for a group seen for the first time
    pub start: StartPosition,
}

/// Errors that can occur when using the event log
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to open consumer: {0}")]
    SubscribeError(String),

    #[error("failed to consume message: {0}")]
    ConsumeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("invalid topic: {0}")]
    InvalidTopic(String),
}

/// Result type for event log operations
pub type BusResult<T> = Result<T, BusError>;

/// Core event log abstraction
///
/// Implementations append records durably and hand out group-aware pull
/// consumers. A single handle may be shared across tasks.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Append a record to a topic and wait for the log to acknowledge it
    ///
    /// # Arguments
    /// * `topic` - The topic to append to (e.g., "cloudevents-stream")
    /// * `key` - Routing key; also used by the log for duplicate detection
    /// * `payload` - The record payload as raw bytes
    ///
    /// # Returns
    /// * `Ok(())` once the record is acknowledged
    /// * `Err(BusError)` if the append failed or was not acknowledged
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Open a pull consumer on a topic for the given group
    async fn consumer(
        &self,
        topic: &str,
        options: ConsumerOptions,
    ) -> BusResult<Box<dyn LogConsumer>>;

    /// Wait for every outstanding publish to settle
    async fn flush(&self) -> BusResult<()> {
        Ok(())
    }
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}

/// A pull consumer owned by exactly one task
#[async_trait]
pub trait LogConsumer: Send {
    /// Wait up to `timeout` for the next record
    ///
    /// # Returns
    /// * `Ok(Some(msg))` when a record was delivered (and committed for the group)
    /// * `Ok(None)` when nothing arrived before the timeout
    /// * `Err(BusError)` for a per-message broker error; the consumer stays usable
    async fn poll(&mut self, timeout: Duration) -> BusResult<Option<BusMessage>>;

    /// Release the consumer's broker resources
    async fn close(&mut self) -> BusResult<()> {
        Ok(())
    }
}

/// Produces event log handles on demand
///
/// Publisher and Subscriber hold a connector instead of a connection so the
/// broker is only contacted on first use.
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self) -> BusResult<Arc<dyn EventBus>>;

    /// Short human-readable name of the backing log, for logs and stats
    fn describe(&self) -> String;
}
