use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stored log line. The append-only substrate alert queries read from.
///
/// Timestamps are persisted at second precision in UTC; `timestamp` is event
/// time as reported by the source, `created_at` is ingestion time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
    pub service: String,
    /// Opaque structured payload, carried verbatim as a string
    pub context: String,
    /// Original line, preserved byte-for-byte for forensic matching
    pub raw_log: String,
    pub created_at: DateTime<Utc>,
}

/// A normalized record as produced by the ingest front-end.
///
/// `timestamp` is optional on the way in: when the source did not provide
/// one it is set to ingestion wall-clock before the row is written.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLogRecord {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub raw_log: String,
}
