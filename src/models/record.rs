//! Log records as they arrive from the broker.

use serde_json::{Map, Value};

use crate::error::DecodeError;

/// Where a delivery sits in the broker log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamPosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl StreamPosition {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl std::fmt::Display for StreamPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// A decoded log record: one JSON object, fields untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LogRecord {
    fields: Map<String, Value>,
}

impl LogRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Decode a raw broker payload.
    ///
    /// The payload must be UTF-8 text holding a JSON object. Anything else is
    /// reported as a [`DecodeError`] for the caller to skip.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::Empty);
        }

        let text = std::str::from_utf8(payload).map_err(|e| DecodeError::Utf8(e.to_string()))?;
        let value: Value =
            serde_json::from_str(text).map_err(|e| DecodeError::Json(e.to_string()))?;

        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(DecodeError::NotAnObject(json_kind(&other))),
        }
    }

    /// Raw `message` value, if present.
    pub fn message_value(&self) -> Option<&Value> {
        self.fields.get("message")
    }

    /// `message` as text. Absent, null and non-string values read as `""`.
    pub fn message_text(&self) -> &str {
        self.message_value().and_then(Value::as_str).unwrap_or("")
    }

    /// `timestamp` as supplied by the producer. Null counts as absent.
    pub fn timestamp(&self) -> Option<&Value> {
        self.fields.get("timestamp").filter(|v| !v.is_null())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

impl From<Map<String, Value>> for LogRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
