//! Shared SQLite handle and schema bootstrap.
//!
//! The job ledger and the settings store live in the application's relational
//! store; both go through one `Database` so the connection is opened and
//! migrated exactly once.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

static SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS backup_settings (
    id                  INTEGER PRIMARY KEY CHECK (id = 1),
    frequency           TEXT NOT NULL,
    backup_time         TEXT NOT NULL,
    retention_days      INTEGER NOT NULL,
    auto_delete         INTEGER NOT NULL,
    compress_backups    INTEGER NOT NULL,
    email_notifications INTEGER NOT NULL,
    notification_email  TEXT,
    last_cleanup        TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS backup_jobs (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    trigger_kind  TEXT NOT NULL,
    status        TEXT NOT NULL,
    created_by    TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    completed_at  TEXT,
    file_count    INTEGER NOT NULL DEFAULT 0,
    total_size    INTEGER NOT NULL DEFAULT 0,
    download_url  TEXT,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_backup_jobs_status ON backup_jobs (status);
CREATE INDEX IF NOT EXISTS idx_backup_jobs_completed_at ON backup_jobs (completed_at);
";

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn with<T, F: FnOnce(&Connection) -> Result<T>>(&self, f: F) -> Result<T> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }
}

pub(crate) fn to_db(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn from_db(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::CorruptRecord(format!("bad timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_schema_bootstrap_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.with(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_settings_singleton_check() {
        let db = Database::open_in_memory().unwrap();
        let res = db.with(|conn| {
            conn.execute(
                "INSERT INTO backup_settings (id, frequency, backup_time, retention_days, \
                 auto_delete, compress_backups, email_notifications, created_at, updated_at) \
                 VALUES (2, 'daily', '02:00', 30, 1, 1, 0, '', '')",
                [],
            )?;
            Ok(())
        });
        assert!(res.is_err());
    }

    #[test]
    fn test_timestamp_round_trip() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 31, 2, 30, 0).unwrap();
        assert_eq!(from_db(&to_db(dt)).unwrap(), dt);
    }

    #[test]
    fn test_timestamp_garbage_rejected() {
        assert!(matches!(from_db("not a time"), Err(Error::CorruptRecord(_))));
    }
}
