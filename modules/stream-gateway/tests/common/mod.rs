//! Shared fixtures for gateway integration tests
//!
//! Every app runs on a private [`InMemoryBus`] with short pacing so
//! scenarios and summary readers finish quickly.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Response;
use axum::Router;
use event_bus::{EventBus, InMemoryBus};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stream_gateway::broadcast::{Observer, ObserverError};
use stream_gateway::config::{BusType, Config};
use stream_gateway::insight::{DisabledInsights, InsightGenerator, InsightResult};
use stream_gateway::AppState;

pub const EVENTS_TOPIC: &str = "cloudevents-stream";
pub const SUMMARY_TOPIC: &str = "gemini-summary";
pub const SUMMARY_GROUP: &str = "demo-app-consumer";

pub fn test_config() -> Config {
    Config {
        bus_type: BusType::InMemory,
        nats_url: None,
        nats_credentials: None,
        events_topic: EVENTS_TOPIC.to_string(),
        summary_topic: SUMMARY_TOPIC.to_string(),
        summary_group_id: SUMMARY_GROUP.to_string(),
        history_group_id: "api-summary-reader".to_string(),
        schema_registry_url: None,
        schema_registry_auth: None,
        gemini_api_key: None,
        gemini_model: "gemini-2.0-flash".to_string(),
        gemini_base_url: "http://127.0.0.1:9".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        scenario_pacing: Duration::from_millis(5),
        insight_pacing: Duration::from_millis(5),
        poll_timeout: Duration::from_millis(50),
        publish_ack_timeout: Duration::from_millis(500),
    }
}

pub struct TestApp {
    pub bus: InMemoryBus,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_generator(Arc::new(DisabledInsights))
    }

    pub fn with_generator(generator: Arc<dyn InsightGenerator>) -> Self {
        Self::with_config(test_config(), generator)
    }

    pub fn with_config(config: Config, generator: Arc<dyn InsightGenerator>) -> Self {
        let bus = InMemoryBus::new();
        let state = AppState::new(config, Arc::new(bus.clone()), generator, None);
        Self { bus, state }
    }

    pub fn router(&self) -> Router {
        stream_gateway::router(self.state.clone())
    }

    pub async fn publish_summary(&self, payload: &[u8]) {
        self.bus
            .publish(SUMMARY_TOPIC, "summary", payload.to_vec())
            .await
            .unwrap();
    }
}

/// Observer that records every frame it is sent
#[derive(Default)]
pub struct RecordingObserver {
    frames: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let observer = Self::default();
        observer.failing.store(true, Ordering::SeqCst);
        Arc::new(observer)
    }

    pub fn frames(&self) -> Vec<Value> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }

    /// The `type` of each frame, in arrival order
    pub fn kinds(&self) -> Vec<String> {
        self.frames()
            .iter()
            .map(|frame| frame["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn of_kind(&self, kind: &str) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter(|frame| frame["type"] == kind)
            .collect()
    }
}

#[async_trait]
impl Observer for RecordingObserver {
    async fn send(&self, frame: &str) -> Result<(), ObserverError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ObserverError::Closed);
        }
        self.frames.lock().unwrap().push(frame.to_string());
        Ok(())
    }
}

/// Generator that always answers with the same insight
pub struct FixedInsights(pub InsightResult);

#[async_trait]
impl InsightGenerator for FixedInsights {
    fn available(&self) -> bool {
        true
    }

    async fn generate(&self, _summary: &event_bus::SummaryRecord) -> InsightResult {
        self.0.clone()
    }
}

pub fn success_insights() -> Arc<dyn InsightGenerator> {
    Arc::new(FixedInsights(InsightResult::Success {
        insight: "Roll back the latest deploy".to_string(),
        timestamp: "2026-01-01T00:00:00Z".to_string(),
    }))
}

/// Poll `check` until it holds or two seconds pass
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
