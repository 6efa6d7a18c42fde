use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::db::{
    helpers::{parse_datetime, parse_optional_datetime, parse_optional_uuid},
    models::{minute_of_day, time_of_day, NewSchedule, ScheduleRecord},
    Database,
};
use crate::error::PersistenceError;

fn row_to_schedule(row: &Row) -> Result<ScheduleRecord> {
    let time: String = row.get("time")?;
    let notification_id: Option<String> = row.get("notification_id")?;
    let delivered_at: Option<String> = row.get("delivered_at")?;

    Ok(ScheduleRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        time: parse_datetime(&time, "time")?,
        repeats_daily: row.get("repeats_daily")?,
        notification_id: parse_optional_uuid(notification_id, "notification_id")?,
        delivered_at: parse_optional_datetime(delivered_at, "delivered_at")?,
    })
}

impl Database {
    /// Persist a schedule and return its store-assigned id.
    pub async fn insert_schedule(&self, schedule: &NewSchedule) -> Result<i64, PersistenceError> {
        let record = schedule.clone();
        self.execute(move |conn| {
            let minute = minute_of_day(time_of_day(&record.time, &Local));
            conn.execute(
                "INSERT INTO medication_schedules (name, time, minute_of_day, repeats_daily)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.name,
                    record.time.to_rfc3339(),
                    minute,
                    record.repeats_daily,
                ],
            )
            .context("failed to insert medication schedule")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// All schedules ordered by local time of day, earliest first.
    pub async fn list_schedules(&self) -> Result<Vec<ScheduleRecord>, PersistenceError> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, time, repeats_daily, notification_id, delivered_at
                 FROM medication_schedules
                 ORDER BY minute_of_day ASC, id ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut schedules = Vec::new();
            while let Some(row) = rows.next()? {
                schedules.push(row_to_schedule(row)?);
            }

            Ok(schedules)
        })
        .await
    }

    /// Record which reminder token is currently registered for a schedule.
    /// A newly registered alert has not been delivered yet, so this also
    /// clears `delivered_at`.
    pub async fn set_schedule_notification(
        &self,
        schedule_id: i64,
        notification_id: Option<Uuid>,
    ) -> Result<(), PersistenceError> {
        self.execute(move |conn| {
            conn.execute(
                "UPDATE medication_schedules
                 SET notification_id = ?1, delivered_at = NULL
                 WHERE id = ?2",
                params![notification_id.map(|id| id.to_string()), schedule_id],
            )
            .context("failed to update schedule notification")?;
            Ok(())
        })
        .await
    }

    /// Mark the schedule's registered alert as delivered at `at`.
    pub async fn mark_schedule_delivered(
        &self,
        schedule_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.execute(move |conn| {
            conn.execute(
                "UPDATE medication_schedules SET delivered_at = ?1 WHERE id = ?2",
                params![at.to_rfc3339(), schedule_id],
            )
            .context("failed to mark schedule delivered")?;
            Ok(())
        })
        .await
    }

    /// Remove every schedule in one transaction; returns how many went.
    pub async fn delete_all_schedules(&self) -> Result<usize, PersistenceError> {
        self.execute_in_transaction(|tx| {
            tx.execute("DELETE FROM medication_schedules", [])
                .context("failed to delete medication schedules")
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn open_store() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("store.sqlite3")).unwrap();
        (dir, db)
    }

    fn at_local(day: u32, hour: u32, minute: u32) -> NewSchedule {
        let time = Local
            .with_ymd_and_hms(2024, 3, day, hour, minute, 0)
            .earliest()
            .unwrap()
            .with_timezone(&Utc);
        NewSchedule {
            name: Some(format!("{hour:02}:{minute:02}")),
            time,
            repeats_daily: true,
        }
    }

    #[tokio::test]
    async fn lists_schedules_by_time_of_day_not_by_date() {
        let (_dir, db) = open_store();

        db.insert_schedule(&at_local(1, 21, 0)).await.unwrap();
        db.insert_schedule(&at_local(9, 8, 30)).await.unwrap();
        db.insert_schedule(&at_local(5, 13, 15)).await.unwrap();

        let names: Vec<String> = db
            .list_schedules()
            .await
            .unwrap()
            .into_iter()
            .filter_map(|schedule| schedule.name)
            .collect();
        assert_eq!(names, vec!["08:30", "13:15", "21:00"]);
    }

    #[tokio::test]
    async fn stores_notification_token() {
        let (_dir, db) = open_store();
        let id = db.insert_schedule(&at_local(1, 9, 0)).await.unwrap();
        let token = Uuid::new_v4();

        db.set_schedule_notification(id, Some(token)).await.unwrap();

        let schedules = db.list_schedules().await.unwrap();
        assert_eq!(schedules[0].notification_id, Some(token));
    }

    #[tokio::test]
    async fn delivery_mark_is_cleared_by_the_next_token() {
        let (_dir, db) = open_store();
        let id = db.insert_schedule(&at_local(1, 6, 0)).await.unwrap();
        let delivered = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 5).unwrap();

        db.set_schedule_notification(id, Some(Uuid::new_v4())).await.unwrap();
        db.mark_schedule_delivered(id, delivered).await.unwrap();
        assert_eq!(db.list_schedules().await.unwrap()[0].delivered_at, Some(delivered));

        db.set_schedule_notification(id, Some(Uuid::new_v4())).await.unwrap();
        assert_eq!(db.list_schedules().await.unwrap()[0].delivered_at, None);
    }

    #[tokio::test]
    async fn unnamed_schedule_round_trips() {
        let (_dir, db) = open_store();
        let mut schedule = at_local(2, 7, 45);
        schedule.name = None;
        schedule.repeats_daily = false;
        let id = db.insert_schedule(&schedule).await.unwrap();

        let stored = db.list_schedules().await.unwrap().remove(0);
        assert_eq!(stored, schedule.with_id(id));
    }

    #[tokio::test]
    async fn delete_all_empties_the_list() {
        let (_dir, db) = open_store();
        db.insert_schedule(&at_local(1, 9, 0)).await.unwrap();
        db.insert_schedule(&at_local(1, 18, 0)).await.unwrap();

        assert_eq!(db.delete_all_schedules().await.unwrap(), 2);
        assert!(db.list_schedules().await.unwrap().is_empty());
    }
}
