use std::env;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusType {
    Nats,
    InMemory,
}

impl BusType {
    pub fn from_env() -> Self {
        match env::var("BUS_TYPE")
            .unwrap_or_else(|_| "inmemory".to_string())
            .to_lowercase()
            .as_str()
        {
            "nats" => BusType::Nats,
            "inmemory" => BusType::InMemory,
            _ => {
                tracing::warn!("Unknown BUS_TYPE, defaulting to inmemory");
                BusType::InMemory
            }
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub bus_type: BusType,
    pub nats_url: Option<String>,
    pub nats_credentials: Option<(String, String)>,

    pub events_topic: String,
    pub summary_topic: String,
    pub summary_group_id: String,
    pub history_group_id: String,

    pub schema_registry_url: Option<String>,
    pub schema_registry_auth: Option<(String, String)>,

    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,

    pub host: String,
    pub port: u16,

    pub scenario_pacing: Duration,
    pub insight_pacing: Duration,
    pub poll_timeout: Duration,
    pub publish_ack_timeout: Duration,
}

// Secrets stay out of logs
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bus_type", &self.bus_type)
            .field("nats_url", &self.nats_url)
            .field("events_topic", &self.events_topic)
            .field("summary_topic", &self.summary_topic)
            .field("summary_group_id", &self.summary_group_id)
            .field("history_group_id", &self.history_group_id)
            .field("schema_registry_url", &self.schema_registry_url)
            .field("gemini_enabled", &self.gemini_api_key.is_some())
            .field("gemini_model", &self.gemini_model)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Unset and empty are treated the same
fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn pair(first: &str, second: &str) -> Option<(String, String)> {
    match (optional(first), optional(second)) {
        (Some(a), Some(b)) => Some((a, b)),
        _ => None,
    }
}

fn millis(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match optional(name) {
        None => Ok(Duration::from_millis(default)),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid {
                var: name,
                value,
                expected: "a whole number of milliseconds",
            }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bus_type = BusType::from_env();

        let nats_url = match bus_type {
            BusType::Nats => Some(var_or("NATS_URL", "nats://localhost:4222")),
            BusType::InMemory => None,
        };

        let port_raw = var_or("PORT", "8000");
        let port = port_raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var: "PORT",
            value: port_raw.clone(),
            expected: "a valid u16",
        })?;

        Ok(Self {
            bus_type,
            nats_url,
            nats_credentials: pair("NATS_USER", "NATS_PASSWORD"),

            events_topic: var_or("EVENTS_TOPIC", "cloudevents-stream"),
            summary_topic: var_or("SUMMARY_TOPIC", "gemini-summary"),
            summary_group_id: var_or("SUMMARY_GROUP_ID", "demo-app-consumer"),
            history_group_id: var_or("HISTORY_GROUP_ID", "api-summary-reader"),

            schema_registry_url: optional("SCHEMA_REGISTRY_URL"),
            schema_registry_auth: pair("SCHEMA_REGISTRY_API_KEY", "SCHEMA_REGISTRY_API_SECRET"),

            gemini_api_key: optional("GEMINI_API_KEY"),
            gemini_model: var_or("GEMINI_MODEL", "gemini-2.0-flash"),
            gemini_base_url: var_or(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com",
            ),

            host: var_or("HOST", "0.0.0.0"),
            port,

            scenario_pacing: millis("SCENARIO_PACING_MS", 2000)?,
            insight_pacing: millis("INSIGHT_PACING_MS", 5000)?,
            poll_timeout: millis("POLL_TIMEOUT_MS", 1000)?,
            publish_ack_timeout: millis("PUBLISH_ACK_TIMEOUT_MS", 5000)?,
        })
    }

    /// True when events go to a real broker rather than process memory
    pub fn bus_configured(&self) -> bool {
        self.bus_type == BusType::Nats
    }
}
