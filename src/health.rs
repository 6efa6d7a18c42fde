//! Degraded-state indicator for presentation.
//!
//! Failures never stop the companion; they are recorded here so a front end
//! can show that reminders are off, the link is down, or the last write was
//! dropped.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub link_state: &'static str,
    pub reminders_enabled: bool,
    pub last_persistence_error: Option<String>,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            link_state: "idle",
            reminders_enabled: true,
            last_persistence_error: None,
        }
    }
}

impl HealthStatus {
    pub fn is_degraded(&self) -> bool {
        !self.reminders_enabled || self.last_persistence_error.is_some()
    }
}

#[derive(Clone)]
pub struct HealthMonitor {
    tx: Arc<watch::Sender<HealthStatus>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(HealthStatus::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> HealthStatus {
        self.tx.borrow().clone()
    }

    pub fn set_link_state(&self, label: &'static str) {
        self.tx.send_if_modified(|status| {
            let changed = status.link_state != label;
            status.link_state = label;
            changed
        });
    }

    pub fn set_reminders_enabled(&self, enabled: bool) {
        self.tx.send_if_modified(|status| {
            let changed = status.reminders_enabled != enabled;
            status.reminders_enabled = enabled;
            changed
        });
    }

    pub fn record_persistence_failure(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|status| {
            status.last_persistence_error = Some(message);
        });
    }

    pub fn clear_persistence_failure(&self) {
        self.tx.send_if_modified(|status| status.last_persistence_error.take().is_some());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_failure_marks_degraded_until_cleared() {
        let health = HealthMonitor::new();
        assert!(!health.current().is_degraded());

        health.record_persistence_failure("disk full");
        assert!(health.current().is_degraded());
        assert_eq!(
            health.current().last_persistence_error.as_deref(),
            Some("disk full")
        );

        health.clear_persistence_failure();
        assert!(!health.current().is_degraded());
    }

    #[test]
    fn denied_reminders_are_degraded() {
        let health = HealthMonitor::new();
        health.set_reminders_enabled(false);
        assert!(health.current().is_degraded());
    }
}
