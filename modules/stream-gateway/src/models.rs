use event_bus::{EventEnvelope, Severity, SummaryRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /api/simulate`
#[derive(Debug, Clone, Deserialize)]
pub struct SimulateRequest {
    /// github, datadog, kubernetes, jenkins, pagerduty, or any custom name
    pub source: String,
    pub event_type: String,
    pub severity: Severity,
    pub subject: String,
    /// cicd, infrastructure, alert, incident
    pub category: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl SimulateRequest {
    pub fn into_envelope(self) -> EventEnvelope {
        EventEnvelope::simulated(&self.source, self.event_type)
            .with_subject(self.subject)
            .with_severity(self.severity)
            .with_category(self.category)
            .with_correlation_id(self.correlation_id)
            .with_data(
                self.data
                    .unwrap_or_else(|| serde_json::json!({ "simulated": true })),
            )
    }
}

#[derive(Debug, Serialize)]
pub struct SimulateResponse {
    pub status: &'static str,
    pub event_id: String,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScenarioQuery {
    pub duration_seconds: Option<u64>,
    pub events_per_minute: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ScenarioResponse {
    pub status: &'static str,
    pub scenario: String,
    pub description: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub websocket_connections: usize,
    pub gemini_available: bool,
    pub bus_configured: bool,
    pub timestamp: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SummariesQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SummariesResponse {
    pub topic: String,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub summaries: Vec<SummaryRecord>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// Everything pushed to observers over the real-time channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    EventSent {
        event: EventEnvelope,
    },
    ScenarioStarted {
        scenario: String,
        name: String,
    },
    ScenarioCompleted {
        scenario: String,
        status: RunStatus,
        events_sent: u64,
    },
    AiAlert {
        summary: SummaryRecord,
    },
    Pong,
}

impl StreamMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamMessage::EventSent { .. } => "event_sent",
            StreamMessage::ScenarioStarted { .. } => "scenario_started",
            StreamMessage::ScenarioCompleted { .. } => "scenario_completed",
            StreamMessage::AiAlert { .. } => "ai_alert",
            StreamMessage::Pong => "pong",
        }
    }

    /// JSON text frame as sent on the wire
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// How a scenario run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}
