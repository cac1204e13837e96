//! Schema-registry framed Avro decoding
//!
//! Records on the derived summary stream are written with a registry-managed
//! schema and framed as:
//!
//! ```text
//! +-------+----------------------+------------------+
//! | 0x00  | schema id (u32, BE)  | avro datum ...   |
//! +-------+----------------------+------------------+
//! ```
//!
//! The schema id is resolved against the registry over HTTP and cached.

use apache_avro::{from_avro_datum, Schema};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::codec::avro_to_json;

/// Leading byte of a registry-framed record
pub const MAGIC_BYTE: u8 = 0;

/// Magic byte plus the 4-byte schema id
pub const FRAME_HEADER_LEN: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("payload is not registry framed")]
    NotFramed,

    #[error("schema {id} not found in registry")]
    SchemaNotFound { id: u32 },

    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry returned unparseable schema {id}: {reason}")]
    InvalidSchema { id: u32, reason: String },

    #[error("datum does not match schema {id}: {reason}")]
    Datum { id: u32, reason: String },
}

impl RegistryError {
    /// True when the payload carried registry framing but could not be decoded
    pub fn is_corrupt(&self) -> bool {
        !matches!(self, RegistryError::NotFramed)
    }
}

/// Split a framed payload into its schema id and datum
pub fn split_frame(payload: &[u8]) -> Result<(u32, &[u8]), RegistryError> {
    if payload.len() < FRAME_HEADER_LEN || payload[0] != MAGIC_BYTE {
        return Err(RegistryError::NotFramed);
    }
    let id = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
    Ok((id, &payload[FRAME_HEADER_LEN..]))
}

/// Prefix a datum with registry framing
pub fn frame(schema_id: u32, datum: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(FRAME_HEADER_LEN + datum.len());
    framed.push(MAGIC_BYTE);
    framed.extend_from_slice(&schema_id.to_be_bytes());
    framed.extend_from_slice(datum);
    framed
}

/// Resolves writer schemas by registry id
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn schema_by_id(&self, id: u32) -> Result<Arc<Schema>, RegistryError>;
}

/// Decode a registry-framed payload into JSON
pub async fn decode_framed(
    source: &dyn SchemaSource,
    payload: &[u8],
) -> Result<serde_json::Value, RegistryError> {
    let (id, datum) = split_frame(payload)?;
    let schema = source.schema_by_id(id).await?;

    let mut reader = datum;
    let value = from_avro_datum(&schema, &mut reader, None).map_err(|e| RegistryError::Datum {
        id,
        reason: e.to_string(),
    })?;

    if !reader.is_empty() {
        return Err(RegistryError::Datum {
            id,
            reason: format!("{} trailing bytes", reader.len()),
        });
    }

    Ok(avro_to_json(value))
}

#[derive(Deserialize)]
struct SchemaResponse {
    schema: String,
}

/// HTTP client for a Confluent-compatible schema registry
///
/// # Example
/// ```rust,no_run
/// use event_bus::SchemaRegistryClient;
///
/// let client = SchemaRegistryClient::new("https://registry.example.com")
///     .unwrap()
///     .with_basic_auth("key".into(), "secret".into());
/// ```
pub struct SchemaRegistryClient {
    base_url: String,
    basic_auth: Option<(String, String)>,
    http: reqwest::Client,
    cache: RwLock<HashMap<u32, Arc<Schema>>>,
}

impl SchemaRegistryClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            basic_auth: None,
            http,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_basic_auth(mut self, key: String, secret: String) -> Self {
        self.basic_auth = Some((key, secret));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch(&self, id: u32) -> Result<Schema, RegistryError> {
        let url = format!("{}/schemas/ids/{}", self.base_url, id);
        let mut request = self.http.get(&url);
        if let Some((key, secret)) = &self.basic_auth {
            request = request.basic_auth(key, Some(secret));
        }

        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::SchemaNotFound { id });
        }

        let body: SchemaResponse = response.error_for_status()?.json().await?;
        Schema::parse_str(&body.schema).map_err(|e| RegistryError::InvalidSchema {
            id,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl SchemaSource for SchemaRegistryClient {
    async fn schema_by_id(&self, id: u32) -> Result<Arc<Schema>, RegistryError> {
        if let Some(schema) = self.cache.read().await.get(&id) {
            return Ok(schema.clone());
        }

        let schema = Arc::new(self.fetch(id).await?);
        tracing::debug!(schema_id = id, registry = %self.base_url, "Cached registry schema");
        self.cache.write().await.insert(id, schema.clone());
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_and_split() {
        let framed = frame(42, b"datum");
        assert_eq!(framed[0], MAGIC_BYTE);
        let (id, datum) = split_frame(&framed).unwrap();
        assert_eq!(id, 42);
        assert_eq!(datum, b"datum");
    }

    #[test]
    fn test_split_rejects_unframed() {
        assert!(matches!(
            split_frame(b"{\"health_status\":\"ok\"}"),
            Err(RegistryError::NotFramed)
        ));
        assert!(matches!(split_frame(&[0, 0, 1]), Err(RegistryError::NotFramed)));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = SchemaRegistryClient::new("http://localhost:8081/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8081");
    }

    #[test]
    fn test_not_framed_is_not_corrupt() {
        assert!(!RegistryError::NotFramed.is_corrupt());
        assert!(RegistryError::SchemaNotFound { id: 1 }.is_corrupt());
    }
}
