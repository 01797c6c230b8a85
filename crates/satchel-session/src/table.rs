//! Relational session table.
//!
//! One row per session: `(session_key PRIMARY KEY, session_data, expire_date)`.
//! `expire_date` is stored as fixed-width RFC 3339 text in UTC, clamped to
//! 1970..=9999, so string comparison in SQL orders it chronologically.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::{Result, SessionError};

// ─────────────────────────────────────────────────────────────────────────────
// Schema Version
// ─────────────────────────────────────────────────────────────────────────────

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Rows
// ─────────────────────────────────────────────────────────────────────────────

/// A stored session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRow {
    /// Backend key.
    pub session_key: String,
    /// Encoded attribute map.
    pub session_data: String,
    /// Instant after which the row is dead.
    pub expire_date: DateTime<Utc>,
}

/// Storage primitives the relational stores are written against.
pub trait SessionTable: Send + Sync {
    /// Insert a row. A duplicate key is [`SessionError::AlreadyExists`].
    fn insert(&self, row: &SessionRow) -> Result<()>;

    /// Replace an existing row. A missing key is [`SessionError::DoesNotExist`].
    fn update(&self, row: &SessionRow) -> Result<()>;

    /// Fetch a row whose expiry is after `now`.
    fn select_unexpired(&self, session_key: &str, now: DateTime<Utc>)
    -> Result<Option<SessionRow>>;

    /// Whether any row has this key, expired or not.
    fn exists(&self, session_key: &str) -> Result<bool>;

    /// Delete a row. Returns whether one existed.
    fn delete(&self, session_key: &str) -> Result<bool>;

    /// Delete rows whose expiry is before `now`. Returns the count.
    fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Latest storable instant. Later years gain a sign and break text ordering.
const LATEST_TIMESTAMP: &str = "9999-12-31T23:59:59.999999Z";

/// Earliest storable instant. Anything before it is already long expired.
const EARLIEST_TIMESTAMP: &str = "1970-01-01T00:00:00.000000Z";

fn format_timestamp(ts: DateTime<Utc>) -> String {
    if ts.year() > 9999 {
        return LATEST_TIMESTAMP.to_string();
    }
    if ts.timestamp() < 0 {
        return EARLIEST_TIMESTAMP.to_string();
    }
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Table
// ─────────────────────────────────────────────────────────────────────────────

/// [`SessionTable`] backed by SQLite.
///
/// Uses WAL mode for better concurrent read performance.
pub struct SqliteSessionTable {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteSessionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSessionTable").finish_non_exhaustive()
    }
}

impl SqliteSessionTable {
    /// Open or create a session database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        let table = Self {
            conn: Mutex::new(conn),
        };
        table.initialize(true)?;

        info!("Session database opened at {:?}", path);
        Ok(table)
    }

    /// Create an in-memory table (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let table = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        table.initialize(false)?;

        debug!("In-memory session table created");
        Ok(table)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves nothing half-written
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initialize(&self, wal: bool) -> Result<()> {
        let conn = self.conn();

        if wal {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
        }

        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if current_version >= SCHEMA_VERSION {
            debug!("Schema up to date (version {})", current_version);
            return Ok(());
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_key TEXT PRIMARY KEY NOT NULL,
                session_data TEXT NOT NULL,
                expire_date TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_expire_date
                ON sessions(expire_date);
            "#,
        )?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        info!("Session schema created (version {})", SCHEMA_VERSION);
        Ok(())
    }
}

impl SessionTable for SqliteSessionTable {
    fn insert(&self, row: &SessionRow) -> Result<()> {
        let conn = self.conn();

        conn.execute(
            "INSERT INTO sessions (session_key, session_data, expire_date) VALUES (?1, ?2, ?3)",
            params![
                row.session_key,
                row.session_data,
                format_timestamp(row.expire_date),
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                SessionError::AlreadyExists
            } else {
                SessionError::Database(e)
            }
        })?;

        debug!(session_key = %row.session_key, "Inserted session row");
        Ok(())
    }

    fn update(&self, row: &SessionRow) -> Result<()> {
        let conn = self.conn();

        let rows_affected = conn.execute(
            "UPDATE sessions SET session_data = ?2, expire_date = ?3 WHERE session_key = ?1",
            params![
                row.session_key,
                row.session_data,
                format_timestamp(row.expire_date),
            ],
        )?;

        if rows_affected == 0 {
            return Err(SessionError::DoesNotExist);
        }

        Ok(())
    }

    fn select_unexpired(
        &self,
        session_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRow>> {
        let conn = self.conn();

        let row = conn
            .query_row(
                "SELECT session_key, session_data, expire_date FROM sessions
                 WHERE session_key = ?1 AND expire_date > ?2",
                params![session_key, format_timestamp(now)],
                |row| {
                    let expire_date: String = row.get(2)?;
                    Ok(SessionRow {
                        session_key: row.get(0)?,
                        session_data: row.get(1)?,
                        expire_date: parse_timestamp(&expire_date)?,
                    })
                },
            )
            .optional()?;

        Ok(row)
    }

    fn exists(&self, session_key: &str) -> Result<bool> {
        let conn = self.conn();

        let found = conn
            .query_row(
                "SELECT 1 FROM sessions WHERE session_key = ?1",
                params![session_key],
                |_| Ok(()),
            )
            .optional()?;

        Ok(found.is_some())
    }

    fn delete(&self, session_key: &str) -> Result<bool> {
        let conn = self.conn();

        let rows_affected = conn.execute(
            "DELETE FROM sessions WHERE session_key = ?1",
            params![session_key],
        )?;

        Ok(rows_affected > 0)
    }

    fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn();

        let rows_affected = conn.execute(
            "DELETE FROM sessions WHERE expire_date < ?1",
            params![format_timestamp(now)],
        )?;

        Ok(rows_affected)
    }
}
