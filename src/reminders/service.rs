use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{Local, Utc};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{confirm_delivery, delay_until_next, ConfirmOutcome, ConfirmPolicy, FireComponents, Notifier};
use crate::{
    db::{Database, NewSchedule, ScheduleRecord, StoreChange},
    device::DeviceHandle,
    error::{NotificationError, PersistenceError},
    health::HealthMonitor,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// One running confirmation loop and the alert it is currently watching.
struct ConfirmationTask {
    cancel: CancellationToken,
    token: Arc<Mutex<Uuid>>,
    handle: JoinHandle<()>,
}

impl ConfirmationTask {
    fn current_token(&self) -> Uuid {
        match self.token.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderOptions {
    /// Cancel a schedule's previous alert (and its loop) when it is re-armed.
    pub replace_existing: bool,
    pub policy: ConfirmPolicy,
}

impl Default for ReminderOptions {
    fn default() -> Self {
        Self {
            replace_existing: true,
            policy: ConfirmPolicy::default(),
        }
    }
}

/// Owns schedule persistence plus every alert and confirmation loop derived
/// from it. Loops are keyed by schedule id so they can be cancelled with it.
#[derive(Clone)]
pub struct ReminderService {
    db: Database,
    notifier: Arc<dyn Notifier>,
    device: DeviceHandle,
    options: ReminderOptions,
    changes: broadcast::Sender<StoreChange>,
    health: HealthMonitor,
    loops: Arc<Mutex<HashMap<i64, Vec<ConfirmationTask>>>>,
}

impl ReminderService {
    pub fn new(
        db: Database,
        notifier: Arc<dyn Notifier>,
        device: DeviceHandle,
        options: ReminderOptions,
        changes: broadcast::Sender<StoreChange>,
        health: HealthMonitor,
    ) -> Self {
        Self {
            db,
            notifier,
            device,
            options,
            changes,
            health,
            loops: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Persist a schedule, then register its reminder. A reminder that cannot
    /// be registered leaves `notification_id` empty; the schedule is kept.
    pub async fn save_schedule(
        &self,
        schedule: NewSchedule,
    ) -> Result<ScheduleRecord, PersistenceError> {
        let id = match self.db.insert_schedule(&schedule).await {
            Ok(id) => id,
            Err(err) => {
                log_error!("failed to save schedule: {err}");
                self.health.record_persistence_failure(err.to_string());
                return Err(err);
            }
        };
        self.health.clear_persistence_failure();

        let mut record = schedule.with_id(id);
        match self.arm(&record).await {
            Ok(token) => record.notification_id = Some(token),
            Err(err) => log_warn!("no reminder for schedule {id}: {err}"),
        }
        let _ = self.changes.send(StoreChange::ScheduleInserted(record.clone()));
        Ok(record)
    }

    /// Register a fresh alert for an existing schedule.
    pub async fn reschedule(&self, record: &ScheduleRecord) -> Result<Uuid, NotificationError> {
        self.arm(record).await
    }

    /// Re-arm reminders for every stored schedule that is still due; returns
    /// how many were armed. One-off schedules whose alert was already
    /// delivered are skipped.
    pub async fn restore(&self) -> Result<usize, PersistenceError> {
        let schedules = self.db.list_schedules().await?;
        let mut armed = 0;
        for record in &schedules {
            if !record.repeats_daily && record.delivered_at.is_some() {
                log_debug!("schedule {} already delivered, not re-armed", record.id);
                continue;
            }
            match self.arm(record).await {
                Ok(_) => armed += 1,
                Err(err) => log_warn!("could not restore reminder for schedule {}: {err}", record.id),
            }
        }
        log_info!("restored {armed} of {} reminders", schedules.len());
        Ok(armed)
    }

    /// Delete every schedule, then cancel their alerts and confirmation loops.
    pub async fn clear_schedules(&self) -> Result<usize, PersistenceError> {
        let removed = match self.db.delete_all_schedules().await {
            Ok(removed) => removed,
            Err(err) => {
                self.health.record_persistence_failure(err.to_string());
                return Err(err);
            }
        };
        self.health.clear_persistence_failure();

        let ids: Vec<i64> = self.lock_loops().keys().copied().collect();
        for id in ids {
            self.retire(id);
        }
        let _ = self.changes.send(StoreChange::SchedulesCleared);
        Ok(removed)
    }

    /// Number of confirmation loops still running.
    pub fn active_loops(&self) -> usize {
        self.lock_loops()
            .values()
            .flatten()
            .filter(|task| !task.handle.is_finished())
            .count()
    }

    /// Stop every loop. Registered alerts are left with the notifier so they
    /// still fire while the companion is not running.
    pub async fn shutdown(&self) {
        let tasks: Vec<ConfirmationTask> = self.lock_loops().drain().flat_map(|(_, tasks)| tasks).collect();
        for task in &tasks {
            task.cancel.cancel();
        }
        for task in tasks {
            if let Err(err) = task.handle.await {
                log_error!("confirmation loop failed to join: {err}");
            }
        }
    }

    async fn arm(&self, record: &ScheduleRecord) -> Result<Uuid, NotificationError> {
        if !self.notifier.request_permission() {
            self.health.set_reminders_enabled(false);
            return Err(NotificationError::PermissionDenied);
        }
        self.health.set_reminders_enabled(true);

        if self.options.replace_existing {
            self.retire(record.id);
            if let Some(previous) = record.notification_id {
                self.notifier.cancel(previous);
            }
        }

        let fire = FireComponents::from_time(record.local_time_of_day());
        let token = Uuid::new_v4();
        self.notifier.schedule(token, fire, false)?;
        self.persist_token(record.id, token).await;

        let cancel = CancellationToken::new();
        let current = Arc::new(Mutex::new(token));
        let handle = tokio::spawn(confirmation_chain(
            self.clone(),
            record.id,
            record.repeats_daily,
            fire,
            current.clone(),
            cancel.clone(),
        ));

        let mut loops = self.lock_loops();
        let tasks = loops.entry(record.id).or_default();
        tasks.retain(|task| !task.handle.is_finished());
        tasks.push(ConfirmationTask {
            cancel,
            token: current,
            handle,
        });

        log_info!(
            "reminder {token} armed for schedule {} at {:02}:{:02}",
            record.id,
            fire.hour,
            fire.minute
        );
        Ok(token)
    }

    /// Cancel every loop for `schedule_id` together with the alert it watches.
    fn retire(&self, schedule_id: i64) {
        let Some(tasks) = self.lock_loops().remove(&schedule_id) else {
            return;
        };
        for task in tasks {
            task.cancel.cancel();
            self.notifier.cancel(task.current_token());
        }
    }

    async fn persist_token(&self, schedule_id: i64, token: Uuid) {
        if let Err(err) = self.db.set_schedule_notification(schedule_id, Some(token)).await {
            log_warn!("could not record reminder {token} for schedule {schedule_id}: {err}");
            self.health.record_persistence_failure(err.to_string());
        }
    }

    async fn mark_delivered(&self, schedule_id: i64) {
        if let Err(err) = self.db.mark_schedule_delivered(schedule_id, Utc::now()).await {
            log_warn!("could not mark schedule {schedule_id} delivered: {err}");
            self.health.record_persistence_failure(err.to_string());
        }
    }

    fn lock_loops(&self) -> MutexGuard<'_, HashMap<i64, Vec<ConfirmationTask>>> {
        match self.loops.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Confirm each occurrence of a schedule's reminder. Daily schedules get the
/// next day's one-shot alert once today's is confirmed or given up on, so a
/// schedule never has more than one alert of its own pending. A confirmed
/// one-off schedule is marked delivered.
async fn confirmation_chain(
    service: ReminderService,
    schedule_id: i64,
    repeats_daily: bool,
    fire: FireComponents,
    current: Arc<Mutex<Uuid>>,
    cancel: CancellationToken,
) {
    let mut token = match current.lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    };

    loop {
        let delay = delay_until_next(&Local::now(), fire.as_time());
        let outcome = confirm_delivery(
            service.notifier.as_ref(),
            &service.device,
            token,
            delay,
            service.options.policy,
            &cancel,
        )
        .await;

        match outcome {
            ConfirmOutcome::Cancelled => {
                log_info!("confirmation loop for schedule {schedule_id} cancelled");
                break;
            }
            ConfirmOutcome::Delivered { .. } if !repeats_daily => {
                service.mark_delivered(schedule_id).await;
                break;
            }
            ConfirmOutcome::GaveUp { polls } if !repeats_daily => {
                log_info!("reminder {token} for schedule {schedule_id} still pending after {polls} checks");
                break;
            }
            ConfirmOutcome::Delivered { .. } => {}
            ConfirmOutcome::GaveUp { polls } => {
                // Today's alert is stale; tomorrow's replaces it.
                log_info!("giving up on reminder {token} after {polls} checks");
                service.notifier.cancel(token);
            }
        }

        if cancel.is_cancelled() {
            break;
        }
        token = Uuid::new_v4();
        if let Err(err) = service.notifier.schedule(token, fire, false) {
            log_warn!("could not register next reminder for schedule {schedule_id}: {err}");
            break;
        }
        match current.lock() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
        service.persist_token(schedule_id, token).await;
    }
}
