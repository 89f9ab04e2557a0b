//! # SQLite-backed reminder store
//!
//! Owns every read and write against the reminder queue and the append-only
//! operational log. Nothing else in the process touches the underlying
//! storage.
//!
//! Mutations take the write lock, reads take the shared lock, and the lock is
//! held only around the statement itself (never across a notifier call), so
//! hold time stays bounded regardless of downstream latency. The connection
//! is opened in serialized mode so shared readers are safe.
//!
//! Expected failure modes (statement errors, mutations matching zero rows)
//! are reported as `false` or an empty list and logged; they never panic and
//! never surface as `Err` to callers. Only opening the database can fail
//! hard.

use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlite::{Connection, ConnectionThreadSafe, State, Statement};

/// Retry ceiling used when a caller passes a non-positive one.
const DEFAULT_MAX_NUM_TRIES: i64 = 10;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS logs(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT DEFAULT NULL,
        message TEXT NOT NULL,
        time INTEGER DEFAULT (strftime('%s', 'now'))
    );
    CREATE TABLE IF NOT EXISTS queue(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        destination INTEGER NOT NULL,
        message TEXT NOT NULL,
        enqueued_on INTEGER DEFAULT (strftime('%s', 'now')),
        fire_on INTEGER NOT NULL,
        delivered_on INTEGER DEFAULT NULL,
        num_tries INTEGER DEFAULT 0
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_dedup
        ON queue(destination, message, fire_on);
    CREATE INDEX IF NOT EXISTS idx_queue_pending
        ON queue(destination, delivered_on, enqueued_on);
    CREATE INDEX IF NOT EXISTS idx_queue_scan
        ON queue(delivered_on, num_tries, fire_on);
";

/// A single queued reminder.
///
/// `id` is assigned by the store (SQLite rowid, monotonic, never reused).
/// Every mutating operation is keyed on `(destination, id)` so one recipient
/// can never touch another recipient's reminders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub destination: i64,
    pub message: String,
    pub enqueued_at: DateTime<Utc>,
    pub fire_at: DateTime<Utc>,
    /// Set exactly once, on the first successful delivery.
    pub delivered_at: Option<DateTime<Utc>>,
    pub num_tries: i64,
}

/// One line of the operational log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub kind: String,
    pub message: String,
    pub time: DateTime<Utc>,
}

/// Cloneable handle to the reminder store.
///
/// Explicitly constructed and passed to collaborators at startup; there is no
/// process-wide handle. Clones share one serialized connection behind a
/// reader/writer lock.
#[derive(Clone)]
pub struct Database {
    conn: Arc<RwLock<ConnectionThreadSafe>>,
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    ///
    /// This is the one fatal path in the store: a process that cannot open
    /// its queue cannot do anything useful.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_thread_safe(path.as_ref()).with_context(|| {
            format!("failed to open database at {}", path.as_ref().display())
        })?;
        Self::initialize(conn)
    }

    /// Open a fresh in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_thread_safe(":memory:")
            .context("failed to open in-memory database")?;
        Self::initialize(conn)
    }

    fn initialize(conn: ConnectionThreadSafe) -> Result<Self> {
        conn.execute(SCHEMA)
            .context("failed to create database schema")?;
        Ok(Database {
            conn: Arc::new(RwLock::new(conn)),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, ConnectionThreadSafe> {
        self.conn
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ConnectionThreadSafe> {
        self.conn
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a new pending reminder.
    ///
    /// A duplicate `(destination, message, fire_at)` tuple is silently
    /// ignored rather than stored twice; double-submission from a chat front
    /// end is common enough that this is a deliberate dedup guard. Returns
    /// false only on a storage failure, which is logged here.
    pub fn enqueue(&self, destination: i64, message: &str, fire_at: DateTime<Utc>) -> bool {
        let conn = self.write();
        let result = conn
            .prepare("INSERT OR IGNORE INTO queue(destination, message, fire_on) VALUES (?, ?, ?)")
            .and_then(|mut statement| {
                statement.bind((1, destination))?;
                statement.bind((2, message))?;
                statement.bind((3, fire_at.timestamp()))?;
                statement.next()?;
                Ok(())
            });

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to enqueue reminder: {e}");
                false
            }
        }
    }

    /// All reminders ready for a delivery attempt at `now`: still pending,
    /// under the retry ceiling, and past their fire time.
    ///
    /// Ordered by enqueue time descending (most recently enqueued first),
    /// with the row id as a tiebreak inside one second. `now` is a parameter
    /// so the delivery cycle evaluates one consistent snapshot and so tests
    /// can simulate time.
    pub fn deliverable_reminders(&self, max_num_tries: i64, now: DateTime<Utc>) -> Vec<Reminder> {
        let max_num_tries = if max_num_tries <= 0 {
            DEFAULT_MAX_NUM_TRIES
        } else {
            max_num_tries
        };

        let conn = self.read();
        let result = conn
            .prepare(
                "SELECT id, destination, message, enqueued_on, fire_on, delivered_on, num_tries
                 FROM queue
                 WHERE delivered_on IS NULL AND num_tries < ? AND fire_on <= ?
                 ORDER BY enqueued_on DESC, id DESC",
            )
            .and_then(|mut statement| {
                statement.bind((1, max_num_tries))?;
                statement.bind((2, now.timestamp()))?;
                read_reminders(&mut statement)
            });

        match result {
            Ok(reminders) => reminders,
            Err(e) => {
                error!("Failed to select deliverable reminders: {e}");
                Vec::new()
            }
        }
    }

    /// All still-pending reminders for one destination, most recently
    /// enqueued first.
    ///
    /// No retry-ceiling filter here: a cancellation UI needs to show
    /// retry-exhausted reminders too, otherwise they could never be removed.
    pub fn pending_reminders(&self, destination: i64) -> Vec<Reminder> {
        let conn = self.read();
        let result = conn
            .prepare(
                "SELECT id, destination, message, enqueued_on, fire_on, delivered_on, num_tries
                 FROM queue
                 WHERE destination = ? AND delivered_on IS NULL
                 ORDER BY enqueued_on DESC, id DESC",
            )
            .and_then(|mut statement| {
                statement.bind((1, destination))?;
                read_reminders(&mut statement)
            });

        match result {
            Ok(reminders) => reminders,
            Err(e) => {
                error!("Failed to select pending reminders: {e}");
                Vec::new()
            }
        }
    }

    /// Look up a single reminder by `(destination, id)`, delivered or not.
    pub fn reminder(&self, destination: i64, id: i64) -> Option<Reminder> {
        let conn = self.read();
        let result = conn
            .prepare(
                "SELECT id, destination, message, enqueued_on, fire_on, delivered_on, num_tries
                 FROM queue
                 WHERE id = ? AND destination = ?",
            )
            .and_then(|mut statement| {
                statement.bind((1, id))?;
                statement.bind((2, destination))?;
                read_reminders(&mut statement)
            });

        match result {
            Ok(reminders) => reminders.into_iter().next(),
            Err(e) => {
                error!("Failed to select reminder: {e}");
                None
            }
        }
    }

    /// Record a successful delivery.
    ///
    /// First write wins: the update only matches a row whose `delivered_on`
    /// is still null, so a second call can never move the timestamp. Returns
    /// false when nothing matched (already delivered, cancelled mid-flight,
    /// or wrong destination) or on a storage error; the two cases are logged
    /// with distinct messages but look identical to the caller.
    pub fn mark_delivered(&self, destination: i64, id: i64) -> bool {
        let conn = self.write();
        let result = conn
            .prepare(
                "UPDATE queue SET delivered_on = ?
                 WHERE id = ? AND destination = ? AND delivered_on IS NULL",
            )
            .and_then(|mut statement| {
                statement.bind((1, Utc::now().timestamp()))?;
                statement.bind((2, id))?;
                statement.bind((3, destination))?;
                statement.next()?;
                Ok(())
            });

        match result {
            Ok(()) if conn.change_count() > 0 => true,
            Ok(()) => {
                error!("No pending reminder to mark delivered for id: {id}, destination: {destination}");
                false
            }
            Err(e) => {
                error!("Failed to mark reminder as delivered: {e}");
                false
            }
        }
    }

    /// Atomically bump the attempt counter for `(destination, id)`.
    pub fn increment_tries(&self, destination: i64, id: i64) -> bool {
        let conn = self.write();
        let result = conn
            .prepare("UPDATE queue SET num_tries = num_tries + 1 WHERE id = ? AND destination = ?")
            .and_then(|mut statement| {
                statement.bind((1, id))?;
                statement.bind((2, destination))?;
                statement.next()?;
                Ok(())
            });

        match result {
            Ok(()) if conn.change_count() > 0 => true,
            Ok(()) => {
                error!("No reminder to increment tries for id: {id}, destination: {destination}");
                false
            }
            Err(e) => {
                error!("Failed to increment num_tries: {e}");
                false
            }
        }
    }

    /// Remove a reminder entirely. Both fields must match.
    pub fn delete(&self, destination: i64, id: i64) -> bool {
        let conn = self.write();
        let result = conn
            .prepare("DELETE FROM queue WHERE id = ? AND destination = ?")
            .and_then(|mut statement| {
                statement.bind((1, id))?;
                statement.bind((2, destination))?;
                statement.next()?;
                Ok(())
            });

        match result {
            Ok(()) if conn.change_count() > 0 => true,
            Ok(()) => {
                error!("No reminder to delete for id: {id}, destination: {destination}");
                false
            }
            Err(e) => {
                error!("Failed to delete reminder: {e}");
                false
            }
        }
    }

    /// Append an informational line to the operational log.
    pub fn log(&self, message: &str) {
        self.append_log("log", message);
    }

    /// Append an error line to the operational log.
    pub fn log_error(&self, message: &str) {
        self.append_log("err", message);
    }

    fn append_log(&self, kind: &str, message: &str) {
        let conn = self.write();
        let result = conn
            .prepare("INSERT INTO logs(kind, message) VALUES (?, ?)")
            .and_then(|mut statement| {
                statement.bind((1, kind))?;
                statement.bind((2, message))?;
                statement.next()?;
                Ok(())
            });

        if let Err(e) = result {
            error!("Failed to append operational log: {e}");
        }
    }

    /// The most recent `limit` operational log lines, newest first.
    pub fn recent_logs(&self, limit: i64) -> Vec<LogEntry> {
        let conn = self.read();
        let result = conn
            .prepare("SELECT kind, message, time FROM logs ORDER BY id DESC LIMIT ?")
            .and_then(|mut statement| {
                statement.bind((1, limit))?;
                let mut entries = Vec::new();
                while let State::Row = statement.next()? {
                    entries.push(LogEntry {
                        kind: statement
                            .read::<Option<String>, _>("kind")?
                            .unwrap_or_default(),
                        message: statement.read::<String, _>("message")?,
                        time: from_unix(statement.read::<i64, _>("time")?),
                    });
                }
                Ok(entries)
            });

        match result {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to select operational logs: {e}");
                Vec::new()
            }
        }
    }
}

fn read_reminders(statement: &mut Statement) -> sqlite::Result<Vec<Reminder>> {
    let mut reminders = Vec::new();
    while let State::Row = statement.next()? {
        reminders.push(Reminder {
            id: statement.read::<i64, _>("id")?,
            destination: statement.read::<i64, _>("destination")?,
            message: statement.read::<String, _>("message")?,
            enqueued_at: from_unix(statement.read::<i64, _>("enqueued_on")?),
            fire_at: from_unix(statement.read::<i64, _>("fire_on")?),
            delivered_at: statement
                .read::<Option<i64>, _>("delivered_on")?
                .map(from_unix),
            num_tries: statement.read::<i64, _>("num_tries")?,
        });
    }
    Ok(reminders)
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}
