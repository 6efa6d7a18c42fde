//! Medication reminders: alert registration, delivery confirmation and the
//! reminder cue sent back to the tracker.

pub mod confirm;
pub mod notifier;
pub mod service;

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone};

pub use confirm::{confirm_delivery, ConfirmOutcome, ConfirmPolicy};
pub use notifier::{FireComponents, LocalNotifier, Notifier};
pub use service::{ReminderOptions, ReminderService};

pub(crate) fn local_at<Tz: TimeZone>(tz: &Tz, day: NaiveDate, time: NaiveTime) -> Option<DateTime<Tz>> {
    let naive = day.and_time(time);
    tz.from_local_datetime(&naive).earliest().or_else(|| {
        // Wall clock skipped this minute (DST gap); fire once it resumes.
        tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest()
    })
}

/// First instant strictly after `now` whose wall-clock time in `now`'s zone is `time`.
pub fn next_fire_after<Tz: TimeZone>(now: &DateTime<Tz>, time: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut day = now.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = local_at(&tz, day, time) {
            if candidate > *now {
                return candidate;
            }
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    now.clone() + chrono::Duration::days(1)
}

pub fn delay_until_next<Tz: TimeZone>(now: &DateTime<Tz>, time: NaiveTime) -> Duration {
    next_fire_after(now, time)
        .signed_duration_since(now.clone())
        .to_std()
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    #[test]
    fn later_today_fires_today() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        assert_eq!(
            next_fire_after(&now, hm(9, 0)),
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
        );
        assert_eq!(delay_until_next(&now, hm(9, 0)), Duration::from_secs(3600));
    }

    #[test]
    fn past_or_current_minute_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        assert_eq!(
            next_fire_after(&now, hm(9, 0)),
            Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap()
        );

        let evening = Utc.with_ymd_and_hms(2024, 12, 31, 22, 30, 0).unwrap();
        assert_eq!(
            next_fire_after(&evening, hm(7, 15)),
            Utc.with_ymd_and_hms(2025, 1, 1, 7, 15, 0).unwrap()
        );
    }
}
