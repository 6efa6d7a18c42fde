//! Error taxonomy for the companion core.
//!
//! None of these are fatal. They are caught where the asynchronous operation
//! completes, logged, and reflected in [`crate::health::HealthStatus`].

use std::path::PathBuf;

use thiserror::Error;

use crate::device::{CharacteristicRole, PeerId};

/// Discovery, connection and characteristic failures on the device link.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("link stack is not powered on")]
    StackUnavailable,

    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error("connection to {peer} failed: {reason}")]
    ConnectFailed { peer: PeerId, reason: String },

    #[error("connection attempt to {0} timed out")]
    ConnectTimeout(PeerId),

    #[error("service discovery failed: {0}")]
    ServiceDiscovery(String),

    #[error("characteristic discovery failed: {0}")]
    CharacteristicDiscovery(String),

    #[error("no device connected")]
    NotConnected,

    #[error("characteristic {0} is not available on the connected device")]
    CharacteristicUnavailable(CharacteristicRole),

    #[error("write to {role} failed: {reason}")]
    WriteFailed {
        role: CharacteristicRole,
        reason: String,
    },

    #[error("{role} payload has {actual} bytes, expected at least {expected}")]
    MalformedPayload {
        role: CharacteristicRole,
        expected: usize,
        actual: usize,
    },
}

/// Store read/write/delete failure. The attempted operation is treated as not applied.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("cannot open store at {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("store schema v{found} is newer than supported v{supported}")]
    UnsupportedSchema { found: i32, supported: i32 },

    #[error("migration to schema v{version} failed: {reason}")]
    Migration { version: i32, reason: String },

    #[error("store worker is not running")]
    WorkerGone,

    #[error("negative timestamp {0} cannot be stored")]
    InvalidTimestamp(i64),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Notification permission or scheduling failure. Degrades to no reminder.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification permission denied")]
    PermissionDenied,

    #[error("invalid fire time {hour:02}:{minute:02}")]
    InvalidFireTime { hour: u32, minute: u32 },

    #[error("failed to schedule notification: {0}")]
    ScheduleFailed(String),
}

#[derive(Debug, Error)]
pub enum CompanionError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Notification(#[from] NotificationError),
}
