use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    helpers::parse_source,
    models::{LogRecord, NewLogRecord},
    Database,
};
use crate::error::PersistenceError;

fn row_to_log(row: &Row) -> Result<LogRecord> {
    let source: String = row.get("source")?;

    Ok(LogRecord {
        id: row.get("id")?,
        timestamp: row.get("timestamp")?,
        source: parse_source(&source)?,
    })
}

fn collect_logs(
    conn: &rusqlite::Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<LogRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(args)?;
    let mut logs = Vec::new();
    while let Some(row) = rows.next()? {
        logs.push(row_to_log(row)?);
    }
    Ok(logs)
}

impl Database {
    /// Persist a dose log and return its store-assigned id.
    pub async fn insert_log(&self, record: &NewLogRecord) -> Result<i64, PersistenceError> {
        if record.timestamp < 0 {
            return Err(PersistenceError::InvalidTimestamp(record.timestamp));
        }

        let record = *record;
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO dose_logs (timestamp, source) VALUES (?1, ?2)",
                params![record.timestamp, record.source.as_str()],
            )
            .context("failed to insert dose log")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// All dose logs, newest first.
    pub async fn list_logs(&self) -> Result<Vec<LogRecord>, PersistenceError> {
        self.execute(|conn| {
            collect_logs(
                conn,
                "SELECT id, timestamp, source FROM dose_logs
                 ORDER BY timestamp DESC, id DESC",
                params![],
            )
        })
        .await
    }

    /// Dose logs with `start <= timestamp <= end`, oldest first.
    pub async fn logs_between(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<LogRecord>, PersistenceError> {
        self.execute(move |conn| {
            collect_logs(
                conn,
                "SELECT id, timestamp, source FROM dose_logs
                 WHERE timestamp BETWEEN ?1 AND ?2
                 ORDER BY timestamp ASC, id ASC",
                params![start, end],
            )
        })
        .await
    }

    /// Remove every dose log in one transaction; returns how many went.
    pub async fn delete_all_logs(&self) -> Result<usize, PersistenceError> {
        self.execute_in_transaction(|tx| {
            tx.execute("DELETE FROM dose_logs", [])
                .context("failed to delete dose logs")
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LogSource;

    fn open_store() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("store.sqlite3")).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn lists_logs_newest_first_regardless_of_insert_order() {
        let (_dir, db) = open_store();

        for ts in [1_700_000_300, 1_700_000_100, 1_700_000_500, 1_700_000_200] {
            db.insert_log(&NewLogRecord::manual(ts)).await.unwrap();
        }

        let logs = db.list_logs().await.unwrap();
        let timestamps: Vec<i64> = logs.iter().map(|log| log.timestamp).collect();
        assert_eq!(
            timestamps,
            vec![1_700_000_500, 1_700_000_300, 1_700_000_200, 1_700_000_100]
        );
    }

    #[tokio::test]
    async fn rejects_negative_timestamp_without_writing() {
        let (_dir, db) = open_store();

        let err = db
            .insert_log(&NewLogRecord::manual(-5))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidTimestamp(-5)));
        assert!(db.list_logs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn logs_between_is_inclusive_and_ascending() {
        let (_dir, db) = open_store();
        for ts in [10, 20, 30, 40] {
            db.insert_log(&NewLogRecord::device(ts)).await.unwrap();
        }

        let logs = db.logs_between(20, 30).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].timestamp, 20);
        assert_eq!(logs[1].timestamp, 30);
        assert!(logs.iter().all(|log| log.source == LogSource::Device));
    }

    #[tokio::test]
    async fn delete_all_empties_the_list() {
        let (_dir, db) = open_store();
        db.insert_log(&NewLogRecord::manual(1)).await.unwrap();
        db.insert_log(&NewLogRecord::manual(2)).await.unwrap();

        assert_eq!(db.delete_all_logs().await.unwrap(), 2);
        assert!(db.list_logs().await.unwrap().is_empty());
    }
}
