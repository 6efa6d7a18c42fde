//! Turns characteristic payloads and manual actions into dose logs.

pub mod decode;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};

pub use decode::DeviceEvent;

use crate::{
    db::{Database, LogRecord, NewLogRecord, StoreChange},
    device::CharacteristicRole,
    error::PersistenceError,
    health::HealthMonitor,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Capacity of the store change feed; slow observers see `Lagged` rather
/// than holding up the writer.
pub const CHANGE_FEED_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct EventPipeline {
    db: Database,
    changes: broadcast::Sender<StoreChange>,
    sensor: Arc<watch::Sender<Option<u8>>>,
    device_clock: Arc<watch::Sender<Option<u32>>>,
    health: HealthMonitor,
}

impl EventPipeline {
    pub fn new(
        db: Database,
        changes: broadcast::Sender<StoreChange>,
        health: HealthMonitor,
    ) -> Self {
        let (sensor, _) = watch::channel(None);
        let (device_clock, _) = watch::channel(None);
        Self {
            db,
            changes,
            sensor: Arc::new(sensor),
            device_clock: Arc::new(device_clock),
            health,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Latest sensor byte, presentation only.
    pub fn sensor_reading(&self) -> watch::Receiver<Option<u8>> {
        self.sensor.subscribe()
    }

    /// Latest clock value the tracker reported, diagnostics only.
    pub fn device_clock(&self) -> watch::Receiver<Option<u32>> {
        self.device_clock.subscribe()
    }

    /// Decode and route one characteristic update. Failures are logged and
    /// the payload dropped; the decoded event is returned for callers that
    /// want to observe it.
    pub async fn handle_payload(
        &self,
        role: CharacteristicRole,
        bytes: &[u8],
    ) -> Option<DeviceEvent> {
        let event = match decode::decode(role, bytes) {
            Ok(Some(event)) => event,
            Ok(None) => {
                log_debug!("ignoring inbound value on outbound role {role}");
                return None;
            }
            Err(err) => {
                log_warn!("dropping payload: {err}");
                return None;
            }
        };

        match event {
            DeviceEvent::SensorReading { value } => {
                self.sensor.send_replace(Some(value));
            }
            DeviceEvent::DoseTaken { timestamp } => {
                if let Err(err) = self.record(NewLogRecord::device(timestamp)).await {
                    log_error!("failed to persist device dose at {timestamp}: {err}");
                }
            }
            DeviceEvent::DeviceClock { epoch_secs } => {
                let readable = DateTime::<Utc>::from_timestamp(i64::from(epoch_secs), 0)
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_else(|| epoch_secs.to_string());
                log_info!("tracker clock reads {readable}");
                self.device_clock.send_replace(Some(epoch_secs));
            }
        }

        Some(event)
    }

    /// Log a dose the user reported by hand at `now`. `on_complete` runs once,
    /// after the write is durable; it does not run when the write fails.
    pub async fn manual_log<F>(
        &self,
        now: DateTime<Utc>,
        on_complete: F,
    ) -> Result<LogRecord, PersistenceError>
    where
        F: FnOnce(&LogRecord),
    {
        let record = self.record(NewLogRecord::manual(now.timestamp())).await?;
        self.sensor.send_replace(Some(1));
        log_info!("manual dose logged at {}", record.timestamp);
        on_complete(&record);
        Ok(record)
    }

    pub async fn clear_logs(&self) -> Result<usize, PersistenceError> {
        match self.db.delete_all_logs().await {
            Ok(removed) => {
                self.health.clear_persistence_failure();
                let _ = self.changes.send(StoreChange::LogsCleared);
                Ok(removed)
            }
            Err(err) => {
                self.health.record_persistence_failure(err.to_string());
                Err(err)
            }
        }
    }

    async fn record(&self, log: NewLogRecord) -> Result<LogRecord, PersistenceError> {
        match self.db.insert_log(&log).await {
            Ok(id) => {
                let record = log.with_id(id);
                self.health.clear_persistence_failure();
                // No subscribers is fine; presentation may not be attached.
                let _ = self.changes.send(StoreChange::LogInserted(record.clone()));
                Ok(record)
            }
            Err(err) => {
                self.health.record_persistence_failure(err.to_string());
                Err(err)
            }
        }
    }
}
