//! Medication schedule records.

use chrono::{DateTime, Local, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRecord {
    pub id: i64,
    pub name: Option<String>,
    /// Full timestamp as entered; only the local hour and minute matter.
    pub time: DateTime<Utc>,
    pub repeats_daily: bool,
    /// Token of the reminder currently registered for this schedule.
    pub notification_id: Option<Uuid>,
    /// Set when that reminder was confirmed delivered. A one-off schedule
    /// with this set is spent and is not re-armed on restore.
    pub delivered_at: Option<DateTime<Utc>>,
}

impl ScheduleRecord {
    pub fn time_of_day_in<Tz: TimeZone>(&self, tz: &Tz) -> NaiveTime {
        time_of_day(&self.time, tz)
    }

    pub fn local_time_of_day(&self) -> NaiveTime {
        self.time_of_day_in(&Local)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Medication")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewSchedule {
    pub name: Option<String>,
    pub time: DateTime<Utc>,
    pub repeats_daily: bool,
}

impl NewSchedule {
    pub fn with_id(self, id: i64) -> ScheduleRecord {
        ScheduleRecord {
            id,
            name: self.name,
            time: self.time,
            repeats_daily: self.repeats_daily,
            notification_id: None,
            delivered_at: None,
        }
    }
}

/// Hour and minute of `time` in `tz`, seconds dropped.
pub fn time_of_day<Tz: TimeZone>(time: &DateTime<Utc>, tz: &Tz) -> NaiveTime {
    let local = time.with_timezone(tz);
    NaiveTime::from_hms_opt(local.hour(), local.minute(), 0).unwrap_or(NaiveTime::MIN)
}

pub fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}
