//! # Event Envelope
//!
//! Canonical record for every simulated operational event, shaped after
//! CloudEvents 1.0.
//!
//! ## Envelope Fields
//!
//! - `specversion`: CloudEvents spec version, always "1.0" for records we create
//! - `id`: Unique identifier; also the routing key on the log
//! - `type`: Reverse-DNS event type (e.g., "com.github.push")
//! - `source`: URI of the system that emitted the event
//! - `time`: RFC 3339 timestamp when the event was generated
//! - `subject`: Human-readable subject line
//! - `datacontenttype`: Media type of `data`
//! - `data`: Opaque payload; round-trips but is never interpreted here
//! - `severity`: info | warning | error | critical
//! - `category`: Grouping such as "cicd", "alert", "infrastructure"
//! - `correlation_id`: Links the events of one incident or deployment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// CloudEvents spec version stamped on new envelopes
pub const SPEC_VERSION: &str = "1.0";

/// Default media type of the `data` field
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Severity level of an operational event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// One simulated event, immutable once serialized
///
/// # Examples
///
/// ```rust
/// use event_bus::{EventEnvelope, Severity};
/// use serde_json::json;
///
/// let envelope = EventEnvelope::simulated("kubernetes", "io.k8s.pod.crash")
///     .with_subject("payment-service crashed (OOM)")
///     .with_severity(Severity::Critical)
///     .with_category("infrastructure")
///     .with_correlation_id(Some("incident-001".to_string()))
///     .with_data(json!({"simulated": true}));
///
/// assert_eq!(envelope.source, "https://kubernetes.com/demo");
/// assert!(envelope.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub specversion: String,

    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    pub source: String,

    pub time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(default = "default_content_type")]
    pub datacontenttype: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Serialized even when absent so observers always see the key
    #[serde(default)]
    pub correlation_id: Option<String>,
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

impl EventEnvelope {
    /// Create a new envelope with a fresh id and the current time
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            specversion: SPEC_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            time: Utc::now(),
            subject: None,
            datacontenttype: default_content_type(),
            data: None,
            severity: None,
            category: None,
            correlation_id: None,
        }
    }

    /// Create an envelope for a simulated source such as "github" or "datadog"
    pub fn simulated(source_name: &str, event_type: impl Into<String>) -> Self {
        Self::new(event_type, format!("https://{source_name}.com/demo"))
    }

    /// Set an explicit id (useful for testing)
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Check the mandatory fields
    ///
    /// # Validation Rules
    ///
    /// - `specversion`, `id`, `type` and `source` must be non-empty
    ///
    /// `time` is always present by construction.
    pub fn validate(&self) -> Result<(), String> {
        if self.specversion.is_empty() {
            return Err("specversion cannot be empty".to_string());
        }
        if self.id.is_empty() {
            return Err("id cannot be empty".to_string());
        }
        if self.event_type.is_empty() {
            return Err("type cannot be empty".to_string());
        }
        if self.source.is_empty() {
            return Err("source cannot be empty".to_string());
        }
        Ok(())
    }
}
