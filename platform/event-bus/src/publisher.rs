//! Lazily connected, flush-per-publish envelope writer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::codec::{self, CodecError};
use crate::{BusConnector, BusError, EventBus, EventEnvelope};

/// Errors surfaced to the caller of [`Publisher::publish`]
///
/// The publisher never retries; a caller that wants retries wraps the call.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("envelope could not be encoded: {0}")]
    Codec(#[from] CodecError),

    #[error("event log unreachable: {0}")]
    Connect(BusError),

    #[error("delivery failed: {0}")]
    Delivery(BusError),

    #[error("delivery not acknowledged within {0:?}")]
    AckTimeout(Duration),
}

enum ConnectionState {
    Uninitialized,
    Connected(Arc<dyn EventBus>),
}

/// Writes [`EventEnvelope`]s onto the event log
///
/// The connection is opened on the first publish, not at construction, so a
/// process can start while the broker is down. The connection mutex is held
/// for the whole encode/send/ack cycle, so publishes through one Publisher
/// reach the log in call order.
pub struct Publisher {
    connector: Arc<dyn BusConnector>,
    default_topic: String,
    ack_timeout: Duration,
    state: Mutex<ConnectionState>,
    published: AtomicU64,
}

impl Publisher {
    pub fn new(
        connector: Arc<dyn BusConnector>,
        default_topic: impl Into<String>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            default_topic: default_topic.into(),
            ack_timeout,
            state: Mutex::new(ConnectionState::Uninitialized),
            published: AtomicU64::new(0),
        }
    }

    pub fn default_topic(&self) -> &str {
        &self.default_topic
    }

    /// Number of envelopes acknowledged by the log through this publisher
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.lock().await, ConnectionState::Connected(_))
    }

    /// Publish to the default topic
    pub async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        self.publish_to(envelope, &self.default_topic).await
    }

    /// Encode, send with the envelope id as key, and wait for the acknowledgement
    pub async fn publish_to(
        &self,
        envelope: &EventEnvelope,
        topic: &str,
    ) -> Result<(), PublishError> {
        // Encoding first: a malformed envelope never opens a connection
        let payload = codec::encode(envelope)?;

        let mut state = self.state.lock().await;
        let existing = match &*state {
            ConnectionState::Connected(bus) => Some(bus.clone()),
            ConnectionState::Uninitialized => None,
        };
        let bus = match existing {
            Some(bus) => bus,
            None => {
                let bus = self
                    .connector
                    .connect()
                    .await
                    .map_err(PublishError::Connect)?;
                tracing::info!(
                    log = %self.connector.describe(),
                    "Event publisher connected (Avro serialization enabled)"
                );
                *state = ConnectionState::Connected(bus.clone());
                bus
            }
        };

        match tokio::time::timeout(self.ack_timeout, bus.publish(topic, &envelope.id, payload))
            .await
        {
            Err(_) => Err(PublishError::AckTimeout(self.ack_timeout)),
            Ok(Err(e)) => Err(PublishError::Delivery(e)),
            Ok(Ok(())) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(event_id = %envelope.id, topic = %topic, "Event published (Avro)");
                Ok(())
            }
        }
    }

    /// Flush outstanding publishes and release the connection
    ///
    /// A later publish reconnects.
    pub async fn close(&self) -> Result<(), PublishError> {
        let mut state = self.state.lock().await;
        if let ConnectionState::Connected(bus) = &*state {
            bus.flush().await.map_err(PublishError::Delivery)?;
            tracing::info!("Event publisher closed");
        }
        *state = ConnectionState::Uninitialized;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BusResult, InMemoryBus};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingConnector {
        bus: InMemoryBus,
        connects: AtomicUsize,
    }

    #[async_trait]
    impl BusConnector for CountingConnector {
        async fn connect(&self) -> BusResult<Arc<dyn EventBus>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(self.bus.clone()))
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    struct UnreachableConnector;

    #[async_trait]
    impl BusConnector for UnreachableConnector {
        async fn connect(&self) -> BusResult<Arc<dyn EventBus>> {
            Err(BusError::ConnectionError("connection refused".to_string()))
        }

        fn describe(&self) -> String {
            "unreachable".to_string()
        }
    }

    fn envelope() -> EventEnvelope {
        EventEnvelope::simulated("github", "com.github.push")
    }

    #[tokio::test]
    async fn test_connects_lazily_once() {
        let connector = Arc::new(CountingConnector {
            bus: InMemoryBus::new(),
            connects: AtomicUsize::new(0),
        });
        let publisher = Publisher::new(connector.clone(), "events", Duration::from_secs(1));

        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
        assert!(!publisher.is_connected().await);

        publisher.publish(&envelope()).await.unwrap();
        publisher.publish(&envelope()).await.unwrap();

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(publisher.published_count(), 2);
        assert_eq!(connector.bus.len("events"), 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_connects_once() {
        let connector = Arc::new(CountingConnector {
            bus: InMemoryBus::new(),
            connects: AtomicUsize::new(0),
        });
        let publisher = Arc::new(Publisher::new(
            connector.clone(),
            "events",
            Duration::from_secs(1),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let publisher = publisher.clone();
                tokio::spawn(async move { publisher.publish(&envelope()).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(connector.bus.len("events"), 8);
    }

    #[tokio::test]
    async fn test_key_is_envelope_id() {
        let bus = InMemoryBus::new();
        let publisher = Publisher::new(Arc::new(bus.clone()), "events", Duration::from_secs(1));
        let envelope = envelope();

        publisher.publish(&envelope).await.unwrap();

        assert_eq!(bus.keys("events"), vec![envelope.id.clone()]);
        let stored = bus.records("events").remove(0);
        assert_eq!(codec::decode(&stored).unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_publish_to_explicit_topic() {
        let bus = InMemoryBus::new();
        let publisher = Publisher::new(Arc::new(bus.clone()), "events", Duration::from_secs(1));

        publisher.publish_to(&envelope(), "other").await.unwrap();

        assert!(bus.is_empty("events"));
        assert_eq!(bus.len("other"), 1);
    }

    #[tokio::test]
    async fn test_unreachable_broker_surfaces_error() {
        let publisher = Publisher::new(
            Arc::new(UnreachableConnector),
            "events",
            Duration::from_secs(1),
        );

        let err = publisher.publish(&envelope()).await.unwrap_err();
        assert!(matches!(err, PublishError::Connect(_)));
        assert!(!publisher.is_connected().await);
        assert_eq!(publisher.published_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_delivery_is_not_retried() {
        let bus = InMemoryBus::new();
        let publisher = Publisher::new(Arc::new(bus.clone()), "events", Duration::from_secs(1));
        bus.set_fail_publishes(true);

        let err = publisher.publish(&envelope()).await.unwrap_err();
        assert!(matches!(err, PublishError::Delivery(_)));

        bus.set_fail_publishes(false);
        assert!(bus.is_empty("events"));
    }

    #[tokio::test]
    async fn test_invalid_envelope_never_connects() {
        let connector = Arc::new(CountingConnector {
            bus: InMemoryBus::new(),
            connects: AtomicUsize::new(0),
        });
        let publisher = Publisher::new(connector.clone(), "events", Duration::from_secs(1));

        let err = publisher
            .publish(&EventEnvelope::new("", "https://github.com/demo"))
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::Codec(_)));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_then_reconnect() {
        let connector = Arc::new(CountingConnector {
            bus: InMemoryBus::new(),
            connects: AtomicUsize::new(0),
        });
        let publisher = Publisher::new(connector.clone(), "events", Duration::from_secs(1));

        publisher.publish(&envelope()).await.unwrap();
        publisher.close().await.unwrap();
        assert!(!publisher.is_connected().await);

        publisher.publish(&envelope()).await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }
}
