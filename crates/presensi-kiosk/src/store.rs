//! Durable attendance log backed by SQLite.
//!
//! Writes are fire-and-forget on a background task with their own
//! connection; the duplicate check is a synchronous point lookup on a
//! long-lived reader connection. A unique index on `(name, date, mode)` keeps
//! the one-mark-per-day rule true even if two writes race.

use crate::event::{AttendanceEvent, Mode};
use crate::tasks::Spawn;
use chrono::{NaiveDate, NaiveTime};
use presensi_core::IdentityKey;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";
const WRITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const READ_BUSY_TIMEOUT: Duration = Duration::from_millis(300);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS attendance (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    name    TEXT NOT NULL,
    date    TEXT NOT NULL,
    time    TEXT NOT NULL,
    mode    TEXT NOT NULL,
    status  TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS attendance_once ON attendance (name, date, mode);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub struct AttendanceStore {
    path: PathBuf,
    reader: Mutex<Connection>,
    spawner: Arc<dyn Spawn>,
}

impl AttendanceStore {
    /// Open (creating if needed) the database and its schema. Idempotent.
    pub fn open(path: &Path, spawner: Arc<dyn Spawn>) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        if let Err(err) = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0)) {
            tracing::warn!(error = %err, "failed to enable WAL mode");
        }
        conn.execute_batch(SCHEMA)?;
        conn.busy_timeout(READ_BUSY_TIMEOUT)?;

        tracing::info!(path = %path.display(), "attendance store ready");
        Ok(Self {
            path: path.to_path_buf(),
            reader: Mutex::new(conn),
            spawner,
        })
    }

    /// Queue a durable write and return immediately. Failures are logged by
    /// the task; the caller never learns about them.
    pub fn record(&self, event: AttendanceEvent) {
        let path = self.path.clone();
        self.spawner.spawn(
            "attendance-write",
            Box::new(move || {
                if insert(&path, &event)? {
                    tracing::info!(%event, "attendance recorded");
                } else {
                    tracing::warn!(%event, "attendance already on record; write ignored");
                }
                Ok(())
            }),
        );
    }

    /// Whether a mark already exists for `(name, date, mode)`.
    ///
    /// Lookup errors are logged and reported as "not marked"; the in-memory
    /// cache still guards the rest of the session.
    pub fn exists(&self, name: &IdentityKey, date: NaiveDate, mode: Mode) -> bool {
        let conn = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        let found = conn
            .prepare_cached("SELECT 1 FROM attendance WHERE name = ?1 AND date = ?2 AND mode = ?3 LIMIT 1")
            .and_then(|mut stmt| {
                stmt.query_row(
                    params![name.as_str(), date.format(DATE_FORMAT).to_string(), mode.as_str()],
                    |_| Ok(()),
                )
                .optional()
            });

        match found {
            Ok(row) => row.is_some(),
            Err(err) => {
                tracing::warn!(error = %err, name = %name, %mode, "duplicate check failed");
                false
            }
        }
    }

    /// All marks for one day, in write order.
    pub fn history(&self, date: NaiveDate) -> Result<Vec<AttendanceEvent>, StoreError> {
        let conn = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare(
            "SELECT name, date, time, mode, status FROM attendance WHERE date = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![date.format(DATE_FORMAT).to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (name, date, time, mode, status) = row?;
            events.push(AttendanceEvent {
                name: IdentityKey::new(&name),
                date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
                    .map_err(|e| StoreError::Corrupt(format!("date '{date}': {e}")))?,
                time: NaiveTime::parse_from_str(&time, TIME_FORMAT)
                    .map_err(|e| StoreError::Corrupt(format!("time '{time}': {e}")))?,
                mode: mode.parse().map_err(StoreError::Corrupt)?,
                status,
            });
        }
        Ok(events)
    }
}

/// Insert on a fresh connection. Returns `false` if the unique index
/// rejected the row as a duplicate.
fn insert(path: &Path, event: &AttendanceEvent) -> Result<bool, StoreError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(WRITE_BUSY_TIMEOUT)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO attendance (name, date, time, mode, status) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.name.as_str(),
            event.date.format(DATE_FORMAT).to_string(),
            event.time.format(TIME_FORMAT).to_string(),
            event.mode.as_str(),
            event.status,
        ],
    )?;
    Ok(inserted == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::InlineSpawner;

    fn event(name: &str, mode: Mode) -> AttendanceEvent {
        AttendanceEvent {
            name: IdentityKey::new(name),
            date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            mode,
            status: "on time".into(),
        }
    }

    fn open(dir: &tempfile::TempDir) -> AttendanceStore {
        AttendanceStore::open(&dir.path().join("nested/attendance.db"), Arc::new(InlineSpawner)).unwrap()
    }

    #[test]
    fn test_open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let first = open(&dir);
        first.record(event("alice", Mode::CheckIn));
        drop(first);

        let second = open(&dir);
        assert_eq!(second.history(event("alice", Mode::CheckIn).date).unwrap().len(), 1);
    }

    #[test]
    fn test_record_then_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        let e = event("alice", Mode::CheckIn);

        assert!(!store.exists(&e.name, e.date, Mode::CheckIn));
        store.record(e.clone());
        assert!(store.exists(&e.name, e.date, Mode::CheckIn));
        assert!(!store.exists(&e.name, e.date, Mode::CheckOut));
        assert!(!store.exists(&IdentityKey::new("bob"), e.date, Mode::CheckIn));
        assert!(!store.exists(&e.name, e.date.succ_opt().unwrap(), Mode::CheckIn));
    }

    #[test]
    fn test_duplicate_write_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.record(event("alice", Mode::CheckIn));
        store.record(event("alice", Mode::CheckIn));
        store.record(event("alice", Mode::CheckOut));

        let history = store.history(event("alice", Mode::CheckIn).date).unwrap();
        let modes: Vec<Mode> = history.iter().map(|e| e.mode).collect();
        assert_eq!(modes, vec![Mode::CheckIn, Mode::CheckOut]);
        assert_eq!(history[0], event("alice", Mode::CheckIn));
    }

    #[test]
    fn test_failed_write_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        std::fs::remove_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested"), b"not a directory").unwrap();
        store.record(event("alice", Mode::CheckIn));
    }
}
