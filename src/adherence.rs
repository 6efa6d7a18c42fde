//! Adherence: how many scheduled dose windows have a matching log.
//!
//! A window is the schedule's hour and minute on one day, every day for daily
//! schedules and only on the record's own day otherwise. A log within
//! `tolerance` of a window satisfies it, and each log satisfies at most one.

use chrono::{DateTime, Duration, NaiveDate, TimeZone};
use serde::Serialize;

use crate::{
    db::{LogRecord, ScheduleRecord},
    reminders::local_at,
};

pub const DEFAULT_TOLERANCE_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdherenceReport {
    pub scheduled: usize,
    pub taken: usize,
}

impl AdherenceReport {
    /// Fraction of windows satisfied; 0 when nothing was scheduled.
    pub fn ratio(&self) -> f64 {
        if self.scheduled == 0 {
            return 0.0;
        }
        self.taken as f64 / self.scheduled as f64
    }

    /// Whole percent, truncated.
    pub fn percent(&self) -> u32 {
        (self.ratio() * 100.0) as u32
    }
}

/// Every dose window between `first_day` and `last_day` inclusive, ascending.
pub fn dose_windows<Tz: TimeZone>(
    schedules: &[ScheduleRecord],
    first_day: NaiveDate,
    last_day: NaiveDate,
    tz: &Tz,
) -> Vec<DateTime<Tz>> {
    let mut windows = Vec::new();
    for day in first_day.iter_days().take_while(|day| *day <= last_day) {
        for schedule in schedules {
            let own_day = schedule.time.with_timezone(tz).date_naive();
            if !schedule.repeats_daily && own_day != day {
                continue;
            }
            if let Some(window) = local_at(tz, day, schedule.time_of_day_in(tz)) {
                windows.push(window);
            }
        }
    }
    windows.sort();
    windows
}

pub fn adherence<Tz: TimeZone>(
    schedules: &[ScheduleRecord],
    logs: &[LogRecord],
    first_day: NaiveDate,
    last_day: NaiveDate,
    tz: &Tz,
    tolerance: Duration,
) -> AdherenceReport {
    let windows = dose_windows(schedules, first_day, last_day, tz);
    let tolerance = tolerance.num_seconds().abs();

    let mut stamps: Vec<i64> = logs.iter().map(|log| log.timestamp).collect();
    stamps.sort_unstable();
    let mut used = vec![false; stamps.len()];

    // Windows and logs are both ascending, so taking the earliest unused log
    // that fits each window never starves a later one.
    let mut taken = 0;
    for window in &windows {
        let at = window.timestamp();
        let start = stamps.partition_point(|&stamp| stamp < at - tolerance);
        let hit = stamps[start..]
            .iter()
            .enumerate()
            .take_while(|(_, stamp)| **stamp <= at + tolerance)
            .find(|(offset, _)| !used[start + offset]);
        if let Some((offset, _)) = hit {
            used[start + offset] = true;
            taken += 1;
        }
    }

    AdherenceReport {
        scheduled: windows.len(),
        taken,
    }
}

fn trailing_days<Tz: TimeZone>(
    schedules: &[ScheduleRecord],
    logs: &[LogRecord],
    today: NaiveDate,
    days: u64,
    tz: &Tz,
    tolerance: Duration,
) -> AdherenceReport {
    let first_day = today
        .checked_sub_days(chrono::Days::new(days.saturating_sub(1)))
        .unwrap_or(today);
    adherence(schedules, logs, first_day, today, tz, tolerance)
}

/// The seven days ending with `today`.
pub fn weekly_progress<Tz: TimeZone>(
    schedules: &[ScheduleRecord],
    logs: &[LogRecord],
    today: NaiveDate,
    tz: &Tz,
    tolerance: Duration,
) -> AdherenceReport {
    trailing_days(schedules, logs, today, 7, tz, tolerance)
}

/// The thirty days ending with `today`.
pub fn monthly_progress<Tz: TimeZone>(
    schedules: &[ScheduleRecord],
    logs: &[LogRecord],
    today: NaiveDate,
    tz: &Tz,
    tolerance: Duration,
) -> AdherenceReport {
    trailing_days(schedules, logs, today, 30, tz, tolerance)
}

/// `weeks` consecutive seven-day buckets ending with `today`, oldest first.
pub fn weekly_series<Tz: TimeZone>(
    schedules: &[ScheduleRecord],
    logs: &[LogRecord],
    today: NaiveDate,
    weeks: usize,
    tz: &Tz,
    tolerance: Duration,
) -> Vec<AdherenceReport> {
    (0..weeks)
        .rev()
        .map(|back| {
            let last_day = today
                .checked_sub_days(chrono::Days::new(7 * back as u64))
                .unwrap_or(today);
            weekly_progress(schedules, logs, last_day, tz, tolerance)
        })
        .collect()
}

/// First and last day a report ending on `today` over `days` days covers,
/// widened by `tolerance` so logs near the edges are fetched too.
pub fn log_range<Tz: TimeZone>(
    today: NaiveDate,
    days: u64,
    tz: &Tz,
    tolerance: Duration,
) -> Option<(i64, i64)> {
    let first_day = today.checked_sub_days(chrono::Days::new(days.saturating_sub(1)))?;
    let start = local_at(tz, first_day, chrono::NaiveTime::MIN)?;
    let end = local_at(tz, today.succ_opt()?, chrono::NaiveTime::MIN)?;
    Some((
        (start - tolerance).timestamp(),
        (end + tolerance).timestamp(),
    ))
}
