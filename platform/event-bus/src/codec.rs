//! Avro binary codec for [`EventEnvelope`]
//!
//! The producer side writes schemaless Avro datums against the compiled-in
//! `CloudEvent` schema (`schemas/cloudevent.avsc`). There is no registry
//! framing on this path; consumers of the raw event topic are expected to
//! know the schema.

use apache_avro::{from_avro_datum, to_avro_datum, types::Value, Schema};
use chrono::{DateTime, NaiveDate, Utc};
use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::envelope::{EventEnvelope, Severity};

const CLOUDEVENT_SCHEMA_JSON: &str = include_str!("../schemas/cloudevent.avsc");

lazy_static! {
    static ref CLOUDEVENT_SCHEMA: Schema =
        Schema::parse_str(CLOUDEVENT_SCHEMA_JSON).expect("compiled-in CloudEvent schema");
}

/// Errors raised while encoding or decoding an envelope
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("avro error: {0}")]
    Avro(String),

    #[error("expected a {expected} record, got {found}")]
    UnexpectedShape { expected: &'static str, found: String },

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid value for field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("{0} trailing bytes after datum")]
    TrailingBytes(usize),
}

/// The compiled-in writer schema
pub fn cloudevent_schema() -> &'static Schema {
    &CLOUDEVENT_SCHEMA
}

/// On-wire text form of the opaque `data` field
///
/// Strings are carried verbatim; any other JSON value is written as compact
/// JSON text. Both `encode` and round-trip comparisons use this.
pub fn normalize_data(data: &serde_json::Value) -> String {
    match data {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse stored text back to JSON only when that is lossless
///
/// The parsed value must normalize to exactly the stored text; anything
/// else (JSON string literals, padded numbers, reordered keys) stays a
/// string.
fn denormalize_data(text: String) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(value) if !value.is_string() && normalize_data(&value) == text => value,
        _ => serde_json::Value::String(text),
    }
}

fn nullable(value: Option<String>) -> Value {
    match value {
        Some(s) => Value::Union(1, Box::new(Value::String(s))),
        None => Value::Union(0, Box::new(Value::Null)),
    }
}

/// Serialize an envelope to a schemaless Avro datum
pub fn encode(envelope: &EventEnvelope) -> Result<Vec<u8>, CodecError> {
    envelope.validate().map_err(CodecError::InvalidEnvelope)?;

    let record = Value::Record(vec![
        ("specversion".to_string(), Value::String(envelope.specversion.clone())),
        ("type".to_string(), Value::String(envelope.event_type.clone())),
        ("source".to_string(), Value::String(envelope.source.clone())),
        ("id".to_string(), Value::String(envelope.id.clone())),
        (
            "time".to_string(),
            Value::String(envelope.time.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)),
        ),
        (
            "datacontenttype".to_string(),
            Value::String(envelope.datacontenttype.clone()),
        ),
        ("subject".to_string(), nullable(envelope.subject.clone())),
        ("data".to_string(), nullable(envelope.data.as_ref().map(normalize_data))),
        (
            "severity".to_string(),
            nullable(envelope.severity.map(|s| s.as_str().to_string())),
        ),
        ("category".to_string(), nullable(envelope.category.clone())),
        ("correlation_id".to_string(), nullable(envelope.correlation_id.clone())),
    ]);

    to_avro_datum(&CLOUDEVENT_SCHEMA, record).map_err(|e| CodecError::Avro(e.to_string()))
}

/// Strict inverse of [`encode`]
pub fn decode(bytes: &[u8]) -> Result<EventEnvelope, CodecError> {
    let mut reader = bytes;
    let value = from_avro_datum(&CLOUDEVENT_SCHEMA, &mut reader, None)
        .map_err(|e| CodecError::Avro(e.to_string()))?;

    if !reader.is_empty() {
        return Err(CodecError::TrailingBytes(reader.len()));
    }

    let mut fields: HashMap<String, Value> = match value {
        Value::Record(fields) => fields.into_iter().collect(),
        other => {
            return Err(CodecError::UnexpectedShape {
                expected: "CloudEvent",
                found: format!("{other:?}"),
            })
        }
    };

    let time_text = required_string(&mut fields, "time")?;
    let time = DateTime::parse_from_rfc3339(&time_text)
        .map_err(|e| CodecError::InvalidField {
            field: "time",
            reason: e.to_string(),
        })?
        .with_timezone(&Utc);

    let severity = optional_string(&mut fields, "severity")?
        .map(|s| s.parse::<Severity>())
        .transpose()
        .map_err(|reason| CodecError::InvalidField {
            field: "severity",
            reason,
        })?;

    Ok(EventEnvelope {
        specversion: required_string(&mut fields, "specversion")?,
        id: required_string(&mut fields, "id")?,
        event_type: required_string(&mut fields, "type")?,
        source: required_string(&mut fields, "source")?,
        time,
        subject: optional_string(&mut fields, "subject")?,
        datacontenttype: required_string(&mut fields, "datacontenttype")?,
        data: optional_string(&mut fields, "data")?.map(denormalize_data),
        severity,
        category: optional_string(&mut fields, "category")?,
        correlation_id: optional_string(&mut fields, "correlation_id")?,
    })
}

fn required_string(
    fields: &mut HashMap<String, Value>,
    name: &'static str,
) -> Result<String, CodecError> {
    match fields.remove(name) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(CodecError::InvalidField {
            field: name,
            reason: format!("expected string, got {other:?}"),
        }),
        None => Err(CodecError::MissingField(name)),
    }
}

fn optional_string(
    fields: &mut HashMap<String, Value>,
    name: &'static str,
) -> Result<Option<String>, CodecError> {
    let value = match fields.remove(name) {
        Some(Value::Union(_, inner)) => *inner,
        Some(other) => other,
        None => return Err(CodecError::MissingField(name)),
    };

    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Err(CodecError::InvalidField {
            field: name,
            reason: format!("expected string or null, got {other:?}"),
        }),
    }
}

/// Convert a decoded Avro value into JSON
///
/// Logical timestamp types become RFC 3339 strings so the result can be sent
/// to observers as-is.
pub fn avro_to_json(value: Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(b),
        Value::Int(i) => Json::from(i),
        Value::Long(l) => Json::from(l),
        Value::Float(f) => serde_json::Number::from_f64(f64::from(f))
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Double(d) => serde_json::Number::from_f64(d)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::String(s) => Json::String(s),
        Value::Enum(_, symbol) => Json::String(symbol),
        Value::Bytes(bytes) | Value::Fixed(_, bytes) => {
            Json::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        Value::Union(_, inner) => avro_to_json(*inner),
        Value::Array(items) => Json::Array(items.into_iter().map(avro_to_json).collect()),
        Value::Map(entries) => Json::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k, avro_to_json(v)))
                .collect(),
        ),
        Value::Record(fields) => Json::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, avro_to_json(v)))
                .collect(),
        ),
        Value::Date(days) => days
            .checked_add(UNIX_EPOCH_DAYS_FROM_CE)
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .map(|d| Json::String(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Json::from(days)),
        Value::TimestampMillis(ms) => DateTime::<Utc>::from_timestamp_millis(ms)
            .map(|t| Json::String(t.to_rfc3339()))
            .unwrap_or(Json::from(ms)),
        Value::TimestampMicros(us) => DateTime::<Utc>::from_timestamp_micros(us)
            .map(|t| Json::String(t.to_rfc3339()))
            .unwrap_or(Json::from(us)),
        Value::Uuid(uuid) => Json::String(uuid.to_string()),
        other => Json::String(format!("{other:?}")),
    }
}

// 1970-01-01 counted from 0001-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> EventEnvelope {
        EventEnvelope::simulated("datadog", "com.datadog.alert.critical")
            .with_subject("High error rate: payment-service")
            .with_severity(Severity::Critical)
            .with_category("alert")
            .with_correlation_id(Some("incident-001".to_string()))
            .with_data(json!({"simulated": true, "scenario": "incident"}))
    }

    #[test]
    fn test_schema_parses() {
        match cloudevent_schema() {
            Schema::Record(record) => assert_eq!(record.name.name, "CloudEvent"),
            other => panic!("unexpected schema {other:?}"),
        }
    }

    #[test]
    fn test_round_trip_full_envelope() {
        let envelope = sample();
        let bytes = encode(&envelope).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_round_trip_minimal_envelope() {
        let envelope = EventEnvelope::new("com.github.push", "https://github.com/demo");
        let decoded = decode(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(decoded, envelope);
        assert!(decoded.subject.is_none());
        assert!(decoded.data.is_none());
    }

    #[test]
    fn test_data_compares_after_normalization() {
        // A JSON string that itself looks like JSON comes back parsed
        let envelope = EventEnvelope::new("t.x", "s").with_data(json!("[1,2]"));
        let decoded = decode(&encode(&envelope).unwrap()).unwrap();

        assert_ne!(decoded.data, envelope.data);
        assert_eq!(
            normalize_data(decoded.data.as_ref().unwrap()),
            normalize_data(envelope.data.as_ref().unwrap())
        );

        // Text that parses but would not re-serialize identically stays text
        for text in ["\"quoted\"", " 5 ", "{\"b\":1, \"a\":2}", "1.0e3"] {
            let envelope = EventEnvelope::new("t.x", "s").with_data(json!(text));
            let decoded = decode(&encode(&envelope).unwrap()).unwrap();
            assert_eq!(decoded.data, Some(json!(text)), "data {text:?}");
            assert_eq!(normalize_data(decoded.data.as_ref().unwrap()), text);
        }
    }

    #[test]
    fn test_date_out_of_range_falls_back_to_day_count() {
        assert_eq!(avro_to_json(Value::Date(i32::MAX)), json!(i32::MAX));
        assert_eq!(avro_to_json(Value::Date(0)), json!("1970-01-01"));
    }

    #[test]
    fn test_plain_text_data_stays_text() {
        let envelope = EventEnvelope::new("t.x", "s").with_data(json!("disk almost full"));
        let decoded = decode(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(decoded.data, Some(json!("disk almost full")));
    }

    #[test]
    fn test_encode_rejects_invalid_envelope() {
        let envelope = EventEnvelope::new("", "https://github.com/demo");
        assert!(matches!(encode(&envelope), Err(CodecError::InvalidEnvelope(_))));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.push(0);
        assert!(matches!(decode(&bytes), Err(CodecError::TrailingBytes(1))));
    }

    #[test]
    fn test_decode_rejects_truncated_input() {
        let bytes = encode(&sample()).unwrap();
        assert!(decode(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn test_decode_rejects_json_text() {
        let text = serde_json::to_vec(&sample()).unwrap();
        assert!(decode(&text).is_err());
    }

    #[test]
    fn test_avro_to_json_flattens_unions_and_timestamps() {
        let value = Value::Record(vec![
            ("health_status".to_string(), Value::String("degraded".to_string())),
            ("total_events".to_string(), Value::Long(42)),
            (
                "top_error_source".to_string(),
                Value::Union(1, Box::new(Value::String("kubernetes".to_string()))),
            ),
            ("window_end".to_string(), Value::TimestampMillis(0)),
            ("anomaly".to_string(), Value::Union(0, Box::new(Value::Null))),
        ]);

        let json = avro_to_json(value);
        assert_eq!(json["health_status"], "degraded");
        assert_eq!(json["total_events"], 42);
        assert_eq!(json["top_error_source"], "kubernetes");
        assert_eq!(json["window_end"], "1970-01-01T00:00:00+00:00");
        assert!(json["anomaly"].is_null());
    }
}
