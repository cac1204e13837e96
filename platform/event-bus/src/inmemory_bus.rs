//! In-memory implementation of the EventBus trait for testing and development

use crate::{
    BusConnector, BusError, BusMessage, BusResult, ConsumerOptions, EventBus, LogConsumer,
    StartPosition,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// EventBus implementation backed by process memory
///
/// This implementation is suitable for:
/// - Unit tests (no external dependencies)
/// - Local development without a NATS server
/// - Integration tests that need fast, isolated logs
///
/// Each topic is an append-only vector of records. Consumer groups keep one
/// committed offset per topic that every member of the group advances, so two
/// consumers in the same group never see the same record. Clones share state.
///
/// # Example
/// ```rust
/// use event_bus::{ConsumerOptions, EventBus, InMemoryBus, StartPosition};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
/// bus.publish("summaries", "k1", b"hello".to_vec()).await?;
///
/// let mut consumer = bus
///     .consumer(
///         "summaries",
///         ConsumerOptions { group_id: "reader".into(), start: StartPosition::Earliest },
///     )
///     .await?;
/// let msg = consumer.poll(Duration::from_millis(100)).await?.unwrap();
/// assert_eq!(msg.payload, b"hello");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBus {
    inner: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<LogState>,
    appended: Notify,
}

#[derive(Default)]
struct LogState {
    topics: HashMap<String, Vec<StoredRecord>>,
    // (group, topic) -> next offset to deliver
    committed: HashMap<(String, String), u64>,
    fail_publishes: bool,
}

#[derive(Clone)]
struct StoredRecord {
    key: String,
    payload: Vec<u8>,
}

impl InMemoryBus {
    /// Create a new, empty in-memory log
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        // A poisoned lock only means a panicking test thread; the data is still usable
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of records appended to a topic so far
    pub fn len(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map_or(0, Vec::len)
    }

    /// Whether a topic has no records
    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    /// Snapshot of the raw payloads of a topic, in append order
    pub fn records(&self, topic: &str) -> Vec<Vec<u8>> {
        self.lock()
            .topics
            .get(topic)
            .map(|records| records.iter().map(|r| r.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Routing keys of a topic, in append order
    pub fn keys(&self, topic: &str) -> Vec<String> {
        self.lock()
            .topics
            .get(topic)
            .map(|records| records.iter().map(|r| r.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Committed offset of a group on a topic, if the group ever attached
    pub fn committed_offset(&self, group_id: &str, topic: &str) -> Option<u64> {
        self.lock()
            .committed
            .get(&(group_id.to_string(), topic.to_string()))
            .copied()
    }

    /// Make every subsequent publish fail (simulates an unreachable broker)
    pub fn set_fail_publishes(&self, fail: bool) {
        self.lock().fail_publishes = fail;
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> BusResult<()> {
        if topic.is_empty() {
            return Err(BusError::InvalidTopic("topic cannot be empty".to_string()));
        }

        {
            let mut state = self.lock();
            if state.fail_publishes {
                return Err(BusError::PublishError(
                    "in-memory log rejecting publishes".to_string(),
                ));
            }
            state
                .topics
                .entry(topic.to_string())
                .or_default()
                .push(StoredRecord {
                    key: key.to_string(),
                    payload,
                });
        }

        self.inner.appended.notify_waiters();
        Ok(())
    }

    async fn consumer(
        &self,
        topic: &str,
        options: ConsumerOptions,
    ) -> BusResult<Box<dyn LogConsumer>> {
        if topic.is_empty() {
            return Err(BusError::InvalidTopic("topic cannot be empty".to_string()));
        }

        {
            let mut state = self.lock();
            let end = state.topics.get(topic).map_or(0, Vec::len) as u64;
            // Start position only applies to a group seen for the first time
            state
                .committed
                .entry((options.group_id.clone(), topic.to_string()))
                .or_insert(match options.start {
                    StartPosition::Earliest => 0,
                    StartPosition::Latest => end,
                });
        }

        Ok(Box::new(InMemoryConsumer {
            bus: self.clone(),
            topic: topic.to_string(),
            group_id: options.group_id,
        }))
    }
}

#[async_trait]
impl BusConnector for InMemoryBus {
    async fn connect(&self) -> BusResult<Arc<dyn EventBus>> {
        Ok(Arc::new(self.clone()))
    }

    fn describe(&self) -> String {
        "inmemory".to_string()
    }
}

struct InMemoryConsumer {
    bus: InMemoryBus,
    topic: String,
    group_id: String,
}

impl InMemoryConsumer {
    fn try_next(&self) -> Option<BusMessage> {
        let mut state = self.bus.lock();
        let group_key = (self.group_id.clone(), self.topic.clone());
        let offset = state.committed.get(&group_key).copied().unwrap_or(0);

        let record = state.topics.get(&self.topic)?.get(offset as usize)?.clone();
        state.committed.insert(group_key, offset + 1);

        Some(
            BusMessage::new(self.topic.clone(), record.payload)
                .with_key(record.key)
                .with_position(0, offset),
        )
    }
}

#[async_trait]
impl LogConsumer for InMemoryConsumer {
    async fn poll(&mut self, timeout: Duration) -> BusResult<Option<BusMessage>> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so an append in between is not missed
            let appended = self.bus.inner.appended.notified();

            if let Some(msg) = self.try_next() {
                return Ok(Some(msg));
            }

            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(None);
            }
        }
    }
}
