use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::Notifier;
use crate::device::DeviceHandle;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmPolicy {
    /// Wait between pending-set checks once the fire time has passed.
    pub poll_interval: Duration,
    /// Give up after this many checks; `None` polls until delivered or cancelled.
    pub max_polls: Option<u32>,
}

impl Default for ConfirmPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_polls: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The alert left the pending set. `signalled` is false when the tracker
    /// could not be reached; the cue is not retried.
    Delivered { polls: u32, signalled: bool },
    Cancelled,
    GaveUp { polls: u32 },
}

/// Returns false when `cancel` fired first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Wait `initial_delay`, then check every `policy.poll_interval` whether
/// `token` is still pending. Once it is gone, send the reminder cue.
///
/// One timer is armed at a time, so a loop that never resolves holds a
/// constant amount of memory.
pub async fn confirm_delivery(
    notifier: &dyn Notifier,
    device: &DeviceHandle,
    token: Uuid,
    initial_delay: Duration,
    policy: ConfirmPolicy,
    cancel: &CancellationToken,
) -> ConfirmOutcome {
    if !sleep_or_cancel(initial_delay, cancel).await {
        return ConfirmOutcome::Cancelled;
    }

    let mut polls: u32 = 0;
    loop {
        polls = polls.saturating_add(1);

        if !notifier.list_pending().contains(&token) {
            log_info!("reminder {token} delivered after {polls} check(s)");
            let signalled = match device.signal_reminder().await {
                Ok(()) => true,
                Err(err) => {
                    log_warn!("reminder {token} delivered but tracker not signalled: {err}");
                    false
                }
            };
            return ConfirmOutcome::Delivered { polls, signalled };
        }

        if policy.max_polls.is_some_and(|max| polls >= max) {
            log_warn!("giving up on reminder {token} after {polls} checks");
            return ConfirmOutcome::GaveUp { polls };
        }

        log_debug!("reminder {token} still pending");
        if !sleep_or_cancel(policy.poll_interval, cancel).await {
            return ConfirmOutcome::Cancelled;
        }
    }
}
