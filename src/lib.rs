pub mod adherence;
pub mod db;
pub mod device;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod reminders;
pub mod settings;
pub mod utils;

use std::sync::Arc;

use chrono::{Local, NaiveDate, Utc};
use serde::Serialize;
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use adherence::AdherenceReport;
use db::{Database, LogRecord, NewSchedule, ScheduleRecord, StoreChange};
use device::{ConnectionController, ConnectionState, DeviceHandle, LinkEvent, LinkStack};
use error::{CompanionError, PersistenceError};
use health::{HealthMonitor, HealthStatus};
use pipeline::{EventPipeline, CHANGE_FEED_CAPACITY};
use reminders::{Notifier, ReminderService};
use settings::CompanionSettings;

/// Weeks shown by [`Progress::series`].
pub const SERIES_WEEKS: usize = 4;

/// Adherence figures for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub weekly: AdherenceReport,
    pub monthly: AdherenceReport,
    /// Seven-day buckets ending today, oldest first.
    pub series: Vec<AdherenceReport>,
}

/// Read schedules and the logs around the last thirty days, then compute
/// progress in local time.
pub async fn load_progress(
    db: &Database,
    today: NaiveDate,
    tolerance: chrono::Duration,
) -> Result<Progress, PersistenceError> {
    let schedules = db.list_schedules().await?;
    let logs = match adherence::log_range(today, 30, &Local, tolerance) {
        Some((start, end)) => db.logs_between(start.max(0), end).await?,
        None => db.list_logs().await?,
    };

    Ok(Progress {
        weekly: adherence::weekly_progress(&schedules, &logs, today, &Local, tolerance),
        monthly: adherence::monthly_progress(&schedules, &logs, today, &Local, tolerance),
        series: adherence::weekly_series(&schedules, &logs, today, SERIES_WEEKS, &Local, tolerance),
    })
}

/// The running companion: connection task, event pipeline and reminders,
/// wired together over one store.
pub struct Companion {
    settings: CompanionSettings,
    db: Database,
    pipeline: EventPipeline,
    reminders: ReminderService,
    device: DeviceHandle,
    health: HealthMonitor,
    cancel: CancellationToken,
    device_task: JoinHandle<()>,
}

impl Companion {
    /// Spawn the connection task and re-arm reminders for every stored
    /// schedule. `link_events` is the queue the link stack's callbacks land on.
    pub async fn start<L>(
        settings: CompanionSettings,
        db: Database,
        link: L,
        link_events: mpsc::UnboundedReceiver<LinkEvent>,
        notifier: Arc<dyn Notifier>,
    ) -> Self
    where
        L: LinkStack + 'static,
    {
        let health = HealthMonitor::new();
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let pipeline = EventPipeline::new(db.clone(), changes.clone(), health.clone());

        let controller = ConnectionController::new(
            link,
            pipeline.clone(),
            health.clone(),
            settings.controller_options(),
        );
        let (device, commands) = controller.handle();
        let cancel = CancellationToken::new();
        let device_task = tokio::spawn(controller.run(link_events, commands, cancel.clone()));

        let reminders = ReminderService::new(
            db.clone(),
            notifier,
            device.clone(),
            settings.reminder_options(),
            changes,
            health.clone(),
        );
        if let Err(err) = reminders.restore().await {
            log::error!("could not restore reminders: {err}");
            health.record_persistence_failure(err.to_string());
        }

        log::info!("companion started with store at {}", db.path().display());
        Self {
            settings,
            db,
            pipeline,
            reminders,
            device,
            health,
            cancel,
            device_task,
        }
    }

    pub fn settings(&self) -> &CompanionSettings {
        &self.settings
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.device.state()
    }

    pub fn health(&self) -> HealthStatus {
        self.health.current()
    }

    pub fn watch_health(&self) -> watch::Receiver<HealthStatus> {
        self.health.subscribe()
    }

    pub fn sensor_reading(&self) -> watch::Receiver<Option<u8>> {
        self.pipeline.sensor_reading()
    }

    /// Store change feed; one message per applied write.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.pipeline.subscribe()
    }

    /// Log a dose taken now. `on_complete` runs once the log is durable.
    pub async fn manual_log<F>(&self, on_complete: F) -> Result<LogRecord, PersistenceError>
    where
        F: FnOnce(&LogRecord),
    {
        self.pipeline.manual_log(Utc::now(), on_complete).await
    }

    pub async fn logs(&self) -> Result<Vec<LogRecord>, PersistenceError> {
        self.db.list_logs().await
    }

    pub async fn schedules(&self) -> Result<Vec<ScheduleRecord>, PersistenceError> {
        self.db.list_schedules().await
    }

    pub async fn save_schedule(
        &self,
        schedule: NewSchedule,
    ) -> Result<ScheduleRecord, PersistenceError> {
        self.reminders.save_schedule(schedule).await
    }

    /// Register a fresh reminder for stored schedule `id`. `None` when no such
    /// schedule exists.
    pub async fn reschedule(&self, id: i64) -> Result<Option<uuid::Uuid>, CompanionError> {
        let schedules = self.db.list_schedules().await?;
        let Some(record) = schedules.into_iter().find(|schedule| schedule.id == id) else {
            return Ok(None);
        };
        let token = self.reminders.reschedule(&record).await?;
        Ok(Some(token))
    }

    pub fn reminders(&self) -> &ReminderService {
        &self.reminders
    }

    pub async fn clear_logs(&self) -> Result<usize, PersistenceError> {
        self.pipeline.clear_logs().await
    }

    pub async fn clear_schedules(&self) -> Result<usize, PersistenceError> {
        self.reminders.clear_schedules().await
    }

    pub async fn progress(&self, today: NaiveDate) -> Result<Progress, PersistenceError> {
        load_progress(&self.db, today, self.settings.adherence_tolerance()).await
    }

    /// Stop the connection task and every confirmation loop. Alerts already
    /// registered with the notifier are left in place.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.device_task.await {
            log::error!("device task failed to join: {err}");
        }
        self.reminders.shutdown().await;
        log::info!("companion stopped");
    }
}
