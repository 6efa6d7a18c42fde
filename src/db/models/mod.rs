pub mod log_record;
pub mod schedule;

use serde::Serialize;

pub use log_record::{LogRecord, LogSource, NewLogRecord};
pub use schedule::{minute_of_day, time_of_day, NewSchedule, ScheduleRecord};

/// Delta published to observers after a store mutation has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "record")]
pub enum StoreChange {
    LogInserted(LogRecord),
    LogsCleared,
    ScheduleInserted(ScheduleRecord),
    SchedulesCleared,
}
