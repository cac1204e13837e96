//! NATS JetStream implementation of the EventBus trait

use crate::{
    BusConnector, BusError, BusMessage, BusResult, ConsumerOptions, EventBus, LogConsumer,
    StartPosition,
};
use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, DeliverPolicy},
    stream,
};
use async_nats::{Client, ConnectOptions, HeaderMap};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// How long a replay consumer may sit idle before the server removes it
const REPLAY_CONSUMER_INACTIVE_THRESHOLD: Duration = Duration::from_secs(300);

/// How long records stay in a stream created by this bus
const STREAM_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 7);

/// Header JetStream uses for duplicate detection; carries the envelope id
const MESSAGE_ID_HEADER: &str = "Nats-Msg-Id";

/// Stream name derived from a topic (`cloudevents-stream` -> `CLOUDEVENTS_STREAM`)
pub fn stream_name(topic: &str) -> String {
    topic
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// EventBus implementation using NATS JetStream
///
/// Every topic is a JetStream stream with a single subject of the same
/// name. Streams are created the first time a topic is used.
///
/// # Example
/// ```rust,no_run
/// use event_bus::{EventBus, NatsBus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = async_nats::connect("nats://localhost:4222").await?;
/// let bus = NatsBus::new(client);
///
/// bus.publish("cloudevents-stream", "event-1", b"hello".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
    known_streams: Arc<Mutex<HashSet<String>>>,
}

impl NatsBus {
    /// Create a new NatsBus from an existing NATS client
    pub fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            known_streams: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Make sure the topic's stream exists; no round-trip once it is known
    async fn ensure_stream(&self, topic: &str) -> BusResult<()> {
        if self.known_streams.lock().await.contains(&stream_name(topic)) {
            return Ok(());
        }
        self.stream(topic).await.map(|_| ())
    }

    /// Stream handle for a topic, created if missing
    async fn stream(&self, topic: &str) -> BusResult<stream::Stream> {
        let name = stream_name(topic);
        let stream = self
            .jetstream
            .get_or_create_stream(stream::Config {
                name: name.clone(),
                subjects: vec![topic.to_string()],
                max_age: STREAM_MAX_AGE,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        if self.known_streams.lock().await.insert(name.clone()) {
            tracing::debug!(stream = %name, topic = %topic, "JetStream stream ready");
        }
        Ok(stream)
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> BusResult<()> {
        self.ensure_stream(topic).await?;

        let mut headers = HeaderMap::new();
        headers.insert(MESSAGE_ID_HEADER, key);

        let ack = self
            .jetstream
            .publish_with_headers(topic.to_string(), headers, payload.into())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        // Second await resolves once the stream has persisted the record
        ack.await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        Ok(())
    }

    async fn consumer(
        &self,
        topic: &str,
        options: ConsumerOptions,
    ) -> BusResult<Box<dyn LogConsumer>> {
        let stream = self.stream(topic).await?;

        let (deliver_policy, inactive_threshold) = match options.start {
            StartPosition::Earliest => (DeliverPolicy::All, REPLAY_CONSUMER_INACTIVE_THRESHOLD),
            StartPosition::Latest => (DeliverPolicy::New, Duration::ZERO),
        };

        let consumer = stream
            .get_or_create_consumer(
                &options.group_id,
                pull::Config {
                    durable_name: Some(options.group_id.clone()),
                    deliver_policy,
                    ack_policy: AckPolicy::Explicit,
                    inactive_threshold,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?
            .map(|item| item.map_err(|e| e.to_string()))
            .boxed();

        tracing::debug!(topic = %topic, group_id = %options.group_id, "JetStream consumer attached");

        Ok(Box::new(NatsConsumer {
            topic: topic.to_string(),
            messages: Some(messages),
        }))
    }

    async fn flush(&self) -> BusResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))
    }
}

struct NatsConsumer {
    topic: String,
    messages: Option<BoxStream<'static, Result<jetstream::Message, String>>>,
}

#[async_trait]
impl LogConsumer for NatsConsumer {
    async fn poll(&mut self, timeout: Duration) -> BusResult<Option<BusMessage>> {
        let messages = self
            .messages
            .as_mut()
            .ok_or_else(|| BusError::ConsumeError("consumer closed".to_string()))?;

        let deadline = Instant::now() + timeout;

        let message = match tokio::time::timeout_at(deadline, messages.next()).await {
            Err(_) => return Ok(None),
            Ok(None) => {
                return Err(BusError::ConnectionError(
                    "JetStream message stream ended".to_string(),
                ))
            }
            Ok(Some(Err(e))) => return Err(BusError::ConsumeError(e)),
            Ok(Some(Ok(message))) => message,
        };

        let offset = message
            .info()
            .map(|info| info.stream_sequence)
            .map_err(|e| BusError::ConsumeError(e.to_string()))?;

        let key = message
            .headers
            .as_ref()
            .and_then(|headers| headers.get(MESSAGE_ID_HEADER))
            .map(|value| value.to_string());

        // Unacked records are redelivered, so a late ack just ends this poll
        match tokio::time::timeout_at(deadline, message.ack()).await {
            Err(_) => {
                tracing::debug!(
                    topic = %self.topic,
                    offset,
                    "Ack did not complete before poll deadline"
                );
                return Ok(None);
            }
            Ok(Err(e)) => return Err(BusError::ConsumeError(e.to_string())),
            Ok(Ok(())) => {}
        }

        let mut msg = BusMessage::new(self.topic.clone(), message.payload.to_vec())
            .with_position(0, offset);
        if let Some(key) = key {
            msg = msg.with_key(key);
        }
        Ok(Some(msg))
    }

    async fn close(&mut self) -> BusResult<()> {
        self.messages = None;
        Ok(())
    }
}

/// Connects to NATS on demand
#[derive(Debug, Clone)]
pub struct NatsConnector {
    url: String,
    credentials: Option<(String, String)>,
    ack_timeout: Duration,
}

impl NatsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
            ack_timeout: Duration::from_secs(5),
        }
    }

    /// Authenticate with a user name and password
    pub fn with_credentials(mut self, user: String, password: String) -> Self {
        self.credentials = Some((user, password));
        self
    }

    /// How long JetStream requests (including publish acks) may take
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }
}

#[async_trait]
impl BusConnector for NatsConnector {
    async fn connect(&self) -> BusResult<Arc<dyn EventBus>> {
        let mut options = ConnectOptions::new().name("stream-gateway");
        if let Some((user, password)) = &self.credentials {
            options = options.user_and_password(user.clone(), password.clone());
        }

        let client = options
            .connect(self.url.as_str())
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        let mut bus = NatsBus::new(client);
        bus.jetstream.set_timeout(self.ack_timeout);

        tracing::info!(url = %self.url, "Connected to NATS JetStream");
        Ok(Arc::new(bus))
    }

    fn describe(&self) -> String {
        format!("nats ({})", self.url)
    }
}
