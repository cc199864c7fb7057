//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Services and listeners call store methods; they never execute SQL directly.

use crate::{
    action_log::ActionLogEvent,
    directory::Role,
    error::{LeadError, LeadResult},
    event::EventLogEntry,
    lead::{LeadAction, LeadStatus},
    ledger::{OperationStatus, OperationType, OwnerType},
    offer_rate::PaymentType,
    tracker_tasks::{PivotStatus, TaskStatus},
};
use rusqlite::{
    params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
    Connection, Row,
};
use rust_decimal::Decimal;
use std::cell::Cell;
use std::str::FromStr;
use std::time::Duration;

mod action_log;
mod directory;
mod lead;
mod ledger;
mod tracker;

pub use tracker::JobRow;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LeadStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file or shared-memory URI
    savepoint_depth: Cell<u32>,
}

impl LeadStore {
    pub fn open(path: &str) -> LeadResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
            savepoint_depth: Cell::new(0),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> LeadResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: None,
            savepoint_depth: Cell::new(0),
        })
    }

    /// Reopen a new connection to the same database.
    /// For plain in-memory databases, this returns a new, isolated database.
    pub fn reopen(&self) -> LeadResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> LeadResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_directory.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_leads.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_ledger.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/005_tracker.sql"))?;
        Ok(())
    }

    /// Run `f` as one atomic unit.
    ///
    /// The outermost call takes the SQLite write lock up front
    /// (`BEGIN IMMEDIATE`), so concurrent writers on other connections
    /// queue behind it. Nested calls become savepoints. Any error rolls
    /// back everything done inside this call.
    pub fn atomic<T, F>(&self, f: F) -> LeadResult<T>
    where
        F: FnOnce(&LeadStore) -> LeadResult<T>,
    {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            match f(self) {
                Ok(value) => match self.conn.execute_batch("COMMIT") {
                    Ok(()) => Ok(value),
                    Err(e) => {
                        self.rollback("ROLLBACK");
                        Err(e.into())
                    }
                },
                Err(e) => {
                    self.rollback("ROLLBACK");
                    Err(e)
                }
            }
        } else {
            let depth = self.savepoint_depth.get() + 1;
            self.savepoint_depth.set(depth);
            let name = format!("lead_sp_{depth}");

            let result = self
                .conn
                .execute_batch(&format!("SAVEPOINT {name}"))
                .map_err(LeadError::from)
                .and_then(|()| f(self));
            self.savepoint_depth.set(depth - 1);

            match result {
                Ok(value) => {
                    self.conn.execute_batch(&format!("RELEASE {name}"))?;
                    Ok(value)
                }
                Err(e) => {
                    self.rollback(&format!("ROLLBACK TO {name}; RELEASE {name}"));
                    Err(e)
                }
            }
        }
    }

    fn rollback(&self, sql: &str) {
        if let Err(e) = self.conn.execute_batch(sql) {
            log::error!("Rollback failed ({sql}): {e}");
        }
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> LeadResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (source, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![entry.source, entry.event_type, entry.payload, entry.created_at],
        )?;
        Ok(())
    }

    pub fn events_of_type(&self, event_type: &str) -> LeadResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source, event_type, payload, created_at
             FROM event_log WHERE event_type = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![event_type], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    source: row.get(1)?,
                    event_type: row.get(2)?,
                    payload: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

/// Read a decimal stored as text.
fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Text-backed enums map to and from their stable names.
macro_rules! text_enum_sql {
    ($($ty:ty => $what:literal),* $(,)?) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    let s = value.as_str()?;
                    <$ty>::parse(s).ok_or_else(|| {
                        FromSqlError::Other(format!("unknown {} '{}'", $what, s).into())
                    })
                }
            }
        )*
    };
}

text_enum_sql! {
    LeadStatus      => "lead status",
    LeadAction      => "lead action",
    PaymentType     => "payment type",
    Role            => "role",
    OwnerType       => "account owner type",
    OperationType   => "operation type",
    OperationStatus => "operation status",
    TaskStatus      => "task status",
    ActionLogEvent  => "action log event",
    PivotStatus     => "pivot status",
}
