//! Registry of live observers and fan-out to all of them

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::models::StreamMessage;

/// Opaque handle of a registered observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("observer connection closed")]
    Closed,

    #[error("send did not complete in time")]
    Timeout,

    #[error("send failed: {0}")]
    Send(String),
}

/// One connected real-time client
#[async_trait]
pub trait Observer: Send + Sync {
    /// Deliver one JSON text frame
    async fn send(&self, frame: &str) -> Result<(), ObserverError>;
}

/// Tracks live observers and fans messages out to them
///
/// A failed send removes that observer within the same broadcast; the
/// others still receive the message. Registry access goes through a
/// `RwLock` so connect, disconnect and broadcast may race freely.
pub struct BroadcastManager {
    observers: RwLock<HashMap<ObserverId, Arc<dyn Observer>>>,
    metrics: Metrics,
}

impl BroadcastManager {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Register a newly accepted observer
    pub async fn connect(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId::new();
        let count = {
            let mut observers = self.observers.write().await;
            observers.insert(id, observer);
            observers.len()
        };
        self.metrics.websocket_connections.set(count as i64);
        tracing::info!(observer = %id, connections = count, "Observer connected");
        id
    }

    /// Remove an observer; absent ids are ignored
    ///
    /// Returns whether the observer was still registered.
    pub async fn disconnect(&self, id: ObserverId) -> bool {
        let (removed, count) = {
            let mut observers = self.observers.write().await;
            let removed = observers.remove(&id).is_some();
            (removed, observers.len())
        };
        if removed {
            self.metrics.websocket_connections.set(count as i64);
            tracing::info!(observer = %id, connections = count, "Observer disconnected");
        }
        removed
    }

    pub async fn count(&self) -> usize {
        self.observers.read().await.len()
    }

    /// Send a message to every registered observer
    ///
    /// Returns the number of observers that received it.
    pub async fn broadcast(&self, message: &StreamMessage) -> usize {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(kind = message.kind(), error = %e, "Failed to serialize broadcast");
                return 0;
            }
        };

        // Sends run on a snapshot, outside the lock
        let snapshot: Vec<(ObserverId, Arc<dyn Observer>)> = self
            .observers
            .read()
            .await
            .iter()
            .map(|(id, observer)| (*id, observer.clone()))
            .collect();

        if snapshot.is_empty() {
            return 0;
        }

        let results = join_all(snapshot.iter().map(|(id, observer)| {
            let frame = frame.as_str();
            async move { (*id, observer.send(frame).await) }
        }))
        .await;

        let mut failed = Vec::new();
        for (id, result) in results {
            if let Err(e) = result {
                tracing::warn!(observer = %id, error = %e, "Dropping observer after failed send");
                failed.push(id);
            }
        }
        let delivered = snapshot.len() - failed.len();

        if !failed.is_empty() {
            let count = {
                let mut observers = self.observers.write().await;
                let mut pruned = 0;
                for id in &failed {
                    if observers.remove(id).is_some() {
                        pruned += 1;
                    }
                }
                self.metrics.observers_pruned_total.inc_by(pruned);
                observers.len()
            };
            self.metrics.websocket_connections.set(count as i64);
        }

        self.metrics
            .broadcast_messages_total
            .with_label_values(&[message.kind()])
            .inc();
        tracing::debug!(kind = message.kind(), delivered, "Broadcast complete");
        delivered
    }
}
