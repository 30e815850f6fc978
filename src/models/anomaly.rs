//! Anomaly document sent to the index store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::LogRecord;

/// A detected anomaly, shaped for the `anomalies` index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyDocument {
    /// Producer timestamp, or detection time when the record had none
    pub timestamp: Value,

    /// Original message value (string or null)
    pub message: Value,

    /// Always `true`
    pub anomaly: bool,

    /// Classifier-supplied note, omitted when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl AnomalyDocument {
    /// Build the document for a record the classifier flagged.
    ///
    /// `detected_at` fills in the timestamp when the record carries none.
    pub fn from_record(
        record: &LogRecord,
        annotation: Option<String>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        let timestamp = record
            .timestamp()
            .cloned()
            .unwrap_or_else(|| epoch_seconds(detected_at));

        Self {
            timestamp,
            message: record.message_value().cloned().unwrap_or(Value::Null),
            anomaly: true,
            annotation,
        }
    }
}

/// Seconds since the Unix epoch with millisecond precision.
fn epoch_seconds(at: DateTime<Utc>) -> Value {
    let secs = at.timestamp_millis() as f64 / 1000.0;
    serde_json::Number::from_f64(secs)
        .map(Value::Number)
        .unwrap_or_else(|| Value::from(at.timestamp()))
}
