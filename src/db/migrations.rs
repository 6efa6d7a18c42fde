//! Schema versions, tracked in `PRAGMA user_version`.
//!
//! Entry `n` of [`MIGRATIONS`] upgrades a store from version `n` to `n + 1`.
//! Each step commits on its own, so a failure leaves the store at the last
//! version that applied cleanly.

use rusqlite::Connection;

use crate::error::PersistenceError;

const ENABLE_LOGS: bool = true;

use crate::log_info;

const MIGRATIONS: [&str; 3] = [
    include_str!("schemas/schema_v1.sql"),
    // notification_id
    include_str!("schemas/schema_v2.sql"),
    // delivered_at
    include_str!("schemas/schema_v3.sql"),
];

pub const CURRENT_SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

fn schema_version(conn: &Connection) -> Result<i32, PersistenceError> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|err| PersistenceError::Migration {
            version: 0,
            reason: format!("cannot read user_version: {err}"),
        })
}

/// Bring the store up to [`CURRENT_SCHEMA_VERSION`]; returns how many steps ran.
pub fn run_migrations(conn: &mut Connection) -> Result<usize, PersistenceError> {
    let found = schema_version(conn)?;
    if found > CURRENT_SCHEMA_VERSION {
        return Err(PersistenceError::UnsupportedSchema {
            found,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }

    let pending = &MIGRATIONS[found.max(0) as usize..];
    for (offset, sql) in pending.iter().enumerate() {
        let version = found + offset as i32 + 1;
        let failed = |err: rusqlite::Error| PersistenceError::Migration {
            version,
            reason: err.to_string(),
        };

        let tx = conn.transaction().map_err(failed)?;
        tx.execute_batch(sql).map_err(failed)?;
        tx.pragma_update(None, "user_version", version)
            .map_err(failed)?;
        tx.commit().map_err(failed)?;
        log_info!("store schema now at v{version}");
    }

    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrates_fresh_database_to_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(run_migrations(&mut conn).unwrap(), MIGRATIONS.len());
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);

        conn.execute(
            "INSERT INTO medication_schedules
                 (name, time, minute_of_day, repeats_daily, notification_id, delivered_at)
             VALUES ('a', '2024-01-01T09:00:00+00:00', 540, 1, NULL, NULL)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn rerunning_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        assert_eq!(run_migrations(&mut conn).unwrap(), 0);
    }

    #[test]
    fn upgrades_a_v2_store_without_losing_rows() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0]).unwrap();
        conn.execute_batch(MIGRATIONS[1]).unwrap();
        conn.pragma_update(None, "user_version", 2).unwrap();
        conn.execute(
            "INSERT INTO medication_schedules (name, time, minute_of_day, repeats_daily)
             VALUES ('kept', '2024-01-01T09:00:00+00:00', 540, 0)",
            [],
        )
        .unwrap();

        assert_eq!(run_migrations(&mut conn).unwrap(), 1);

        let (name, delivered): (String, Option<String>) = conn
            .query_row(
                "SELECT name, delivered_at FROM medication_schedules",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(name, "kept");
        assert_eq!(delivered, None);
    }

    #[test]
    fn rejects_newer_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION + 1)
            .unwrap();
        assert!(matches!(
            run_migrations(&mut conn),
            Err(PersistenceError::UnsupportedSchema { found, .. }) if found == CURRENT_SCHEMA_VERSION + 1
        ));
    }
}
