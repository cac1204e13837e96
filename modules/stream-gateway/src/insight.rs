//! Optional natural-language assessment of health summaries
//!
//! The generator is an external collaborator. Whatever it does, the
//! augmenter hands back a summary, so the stream never stalls on it.

use async_trait::async_trait;
use chrono::Utc;
use event_bus::SummaryRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::Metrics;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum InsightError {
    #[error("insight request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("insight provider quota exhausted (HTTP 429)")]
    RateLimited,

    #[error("insight provider returned HTTP {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("insight provider returned no text")]
    EmptyResponse,
}

/// Outcome of one insight request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum InsightResult {
    Success { insight: String, timestamp: String },
    Unavailable { recommendation: String },
    Error { error: String },
}

impl InsightResult {
    pub fn status(&self) -> &'static str {
        match self {
            InsightResult::Success { .. } => "success",
            InsightResult::Unavailable { .. } => "unavailable",
            InsightResult::Error { .. } => "error",
        }
    }
}

#[async_trait]
pub trait InsightGenerator: Send + Sync {
    fn available(&self) -> bool;

    /// Never fails: problems come back as [`InsightResult::Error`]
    async fn generate(&self, summary: &SummaryRecord) -> InsightResult;
}

/// Used when no API key is configured
pub struct DisabledInsights;

#[async_trait]
impl InsightGenerator for DisabledInsights {
    fn available(&self) -> bool {
        false
    }

    async fn generate(&self, _summary: &SummaryRecord) -> InsightResult {
        InsightResult::Unavailable {
            recommendation: "Enable Gemini API for AI insights".to_string(),
        }
    }
}

fn text_field(summary: &SummaryRecord, key: &str, default: &str) -> String {
    match summary.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => default.to_string(),
        Some(other) => other.to_string(),
    }
}

fn number_field(summary: &SummaryRecord, key: &str) -> String {
    match summary.get(key) {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => "0".to_string(),
    }
}

/// Prompt describing one summary
pub fn build_prompt(summary: &SummaryRecord) -> String {
    let error_rate = summary
        .get("error_rate_percent")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);

    format!(
        "Analyze this system health summary and provide actionable insights:

**System Health Status:** {status}
**Time Window:** {window}

**Event Metrics:**
- Total Events: {total}
- Critical Events: {critical}
- Error Events: {errors}
- Warning Events: {warnings}
- Error Rate: {error_rate:.2}%
- Error Trend: {trend}

**Top Problem Source:** {top_source}
- Error Count from this source: {top_count}

**Additional Context:**
- Total Sources Monitored: {sources}
- Correlated Incidents: {correlations}
- Anomalies Detected: {anomalies}

Provide a brief assessment:
1. **Status**: One sentence summarizing the current state
2. **Root Cause**: Which system/service is the primary issue source
3. **Impact**: What's affected and severity level
4. **Recommendation**: One actionable step to resolve

Keep response under 150 words.",
        status = text_field(summary, "health_status", "unknown"),
        window = text_field(summary, "window_end", "unknown"),
        total = number_field(summary, "total_events"),
        critical = number_field(summary, "critical_count"),
        errors = number_field(summary, "error_count"),
        warnings = number_field(summary, "warning_count"),
        trend = text_field(summary, "error_trend", "unknown"),
        top_source = text_field(summary, "top_error_source", "None identified"),
        top_count = number_field(summary, "top_error_count"),
        sources = number_field(summary, "total_sources"),
        correlations = number_field(summary, "correlation_count"),
        anomalies = number_field(summary, "anomaly_count"),
    )
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> Option<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Gemini `generateContent` client
pub struct GeminiInsights {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiInsights {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, InsightError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request(&self, prompt: &str) -> Result<String, InsightError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
        };

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(InsightError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InsightError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<GenerateResponse>()
            .await?
            .text()
            .ok_or(InsightError::EmptyResponse)
    }
}

#[async_trait]
impl InsightGenerator for GeminiInsights {
    fn available(&self) -> bool {
        true
    }

    async fn generate(&self, summary: &SummaryRecord) -> InsightResult {
        match self.request(&build_prompt(summary)).await {
            Ok(insight) => InsightResult::Success {
                insight,
                timestamp: Utc::now().to_rfc3339(),
            },
            Err(e) => {
                tracing::error!(model = %self.model, error = %e, "Gemini error");
                InsightResult::Error {
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Attaches `ai_insight` to summaries when a generator is available
pub struct InsightAugmenter {
    generator: Arc<dyn InsightGenerator>,
    metrics: Metrics,
}

impl InsightAugmenter {
    pub fn new(generator: Arc<dyn InsightGenerator>, metrics: Metrics) -> Self {
        Self { generator, metrics }
    }

    pub fn available(&self) -> bool {
        self.generator.available()
    }

    pub async fn augment(&self, mut summary: SummaryRecord) -> SummaryRecord {
        if !self.generator.available() {
            return summary;
        }

        let result = self.generator.generate(&summary).await;
        self.metrics
            .insight_results_total
            .with_label_values(&[result.status()])
            .inc();
        if let InsightResult::Error { error } = &result {
            tracing::warn!(error = %error, "AI insight skipped");
        }

        match serde_json::to_value(&result) {
            Ok(value) => summary.insert("ai_insight", value),
            Err(e) => tracing::warn!(error = %e, "AI insight could not be serialized"),
        }
        summary
    }
}
