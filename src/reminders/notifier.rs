use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use chrono::{Local, NaiveTime};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::delay_until_next;
use crate::error::NotificationError;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Local wall-clock time an alert fires at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireComponents {
    pub hour: u32,
    pub minute: u32,
}

impl FireComponents {
    pub fn new(hour: u32, minute: u32) -> Result<Self, NotificationError> {
        if hour > 23 || minute > 59 {
            return Err(NotificationError::InvalidFireTime { hour, minute });
        }
        Ok(Self { hour, minute })
    }

    pub fn from_time(time: NaiveTime) -> Self {
        use chrono::Timelike;
        Self {
            hour: time.hour(),
            minute: time.minute(),
        }
    }

    pub fn as_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

/// The OS notification centre as seen by the companion.
pub trait Notifier: Send + Sync {
    /// Ask for permission to post alerts; `false` means reminders are off.
    fn request_permission(&self) -> bool;

    fn schedule(
        &self,
        id: Uuid,
        fire: FireComponents,
        repeats: bool,
    ) -> Result<(), NotificationError>;

    fn cancel(&self, id: Uuid);

    /// Tokens of alerts that have neither fired nor been cancelled.
    fn list_pending(&self) -> HashSet<Uuid>;
}

struct PendingAlert {
    fire: FireComponents,
    repeats: bool,
    cancel: CancellationToken,
}

/// In-process notifier backed by tokio timers.
///
/// One-shot alerts leave the pending set when they fire; repeating alerts
/// stay pending and fire again the next day.
#[derive(Clone)]
pub struct LocalNotifier {
    pending: Arc<Mutex<HashMap<Uuid, PendingAlert>>>,
    granted: Arc<AtomicBool>,
    delivered: broadcast::Sender<Uuid>,
}

impl Default for LocalNotifier {
    fn default() -> Self {
        Self::new(true)
    }
}

impl LocalNotifier {
    pub fn new(permission_granted: bool) -> Self {
        let (delivered, _) = broadcast::channel(32);
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            granted: Arc::new(AtomicBool::new(permission_granted)),
            delivered,
        }
    }

    pub fn set_permission(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }

    /// Tokens of alerts as they fire.
    pub fn deliveries(&self) -> broadcast::Receiver<Uuid> {
        self.delivered.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, PendingAlert>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn run_alert(self, id: Uuid, fire: FireComponents, repeats: bool, cancel: CancellationToken) {
        loop {
            let delay = delay_until_next(&Local::now(), fire.as_time());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            log_info!("alert {id} delivered ({:02}:{:02})", fire.hour, fire.minute);
            if !repeats {
                self.lock().remove(&id);
            }
            let _ = self.delivered.send(id);
            if !repeats {
                break;
            }
        }
    }
}

impl Notifier for LocalNotifier {
    fn request_permission(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    fn schedule(
        &self,
        id: Uuid,
        fire: FireComponents,
        repeats: bool,
    ) -> Result<(), NotificationError> {
        if !self.request_permission() {
            return Err(NotificationError::PermissionDenied);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| NotificationError::ScheduleFailed(err.to_string()))?;

        let cancel = CancellationToken::new();
        if let Some(previous) = self.lock().insert(
            id,
            PendingAlert {
                fire,
                repeats,
                cancel: cancel.clone(),
            },
        ) {
            previous.cancel.cancel();
        }

        runtime.spawn(self.clone().run_alert(id, fire, repeats, cancel));
        log_debug!("scheduled alert {id} at {:02}:{:02} repeats={repeats}", fire.hour, fire.minute);
        Ok(())
    }

    fn cancel(&self, id: Uuid) {
        if let Some(alert) = self.lock().remove(&id) {
            alert.cancel.cancel();
            log_debug!(
                "cancelled alert {id} for {:02}:{:02} (repeats={})",
                alert.fire.hour,
                alert.fire.minute,
                alert.repeats
            );
        }
    }

    fn list_pending(&self) -> HashSet<Uuid> {
        self.lock().keys().copied().collect()
    }
}
