//! Dose log records.

use serde::{Deserialize, Serialize};

/// Where a dose log came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LogSource {
    Device,
    Manual,
}

impl LogSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSource::Device => "Device",
            LogSource::Manual => "Manual",
        }
    }
}

/// A dose log as stored. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: i64,
    /// Seconds since the Unix epoch, never negative.
    pub timestamp: i64,
    pub source: LogSource,
}

/// A dose log before the store has assigned it an id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewLogRecord {
    pub timestamp: i64,
    pub source: LogSource,
}

impl NewLogRecord {
    pub fn device(timestamp: u32) -> Self {
        Self {
            timestamp: i64::from(timestamp),
            source: LogSource::Device,
        }
    }

    pub fn manual(timestamp: i64) -> Self {
        Self {
            timestamp,
            source: LogSource::Manual,
        }
    }

    pub fn with_id(self, id: i64) -> LogRecord {
        LogRecord {
            id,
            timestamp: self.timestamp,
            source: self.source,
        }
    }
}
