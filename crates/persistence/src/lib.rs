// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Persistence layer for the Paceline attendance service.
//!
//! This crate owns all durable state: runs, attendances, and the calendar
//! configuration. It is built on Diesel over SQLite with embedded migrations
//! and a pooled connection set.
//!
//! Correctness properties enforced here rather than in application code:
//!
//! - at most one run per date (`UNIQUE(runs.date)`)
//! - globally unique session codes (`UNIQUE(runs.session_code)`)
//! - at most one attendance per runner per run
//!   (`UNIQUE(attendances.run_id, attendances.runner_id)`)
//!
//! Registration is therefore safe under any degree of request parallelism
//! and across multiple processes sharing the database file.
//!
//! ## Testing
//!
//! In-memory databases use a shared-cache URI with a process-wide atomic
//! counter, so every `new_in_memory()` call receives an isolated database
//! without time-based name collisions.

#![deny(
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    clippy::style,
    clippy::correctness,
    clippy::all,
    clippy::suspicious,
    clippy::complexity,
    clippy::perf,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(clippy::multiple_crate_versions)]

use chrono::{NaiveDate, NaiveDateTime};
use paceline_domain::{Attendance, Run, SessionCode};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

mod data_models;
mod diesel_schema;
mod error;
mod mutations;
mod queries;
mod sqlite;

#[cfg(test)]
mod tests;

pub use data_models::{CalendarDayOverview, HistoryRow};
pub use error::PersistenceError;
pub use mutations::RegisterResult;

/// Atomic counter for generating unique in-memory database names.
///
/// This ensures deterministic test isolation by eliminating time-based
/// collisions. Each call to `new_in_memory()` receives a unique sequential ID.
static DB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Default number of pooled connections, sized to fit a free-tier database.
pub const DEFAULT_POOL_SIZE: u32 = 5;

/// Persistence adapter for runs, attendances, and calendar configuration.
///
/// Cloning is cheap: clones share the underlying connection pool.
#[derive(Clone)]
pub struct Persistence {
    pool: sqlite::SqlitePool,
}

impl Persistence {
    /// Creates a persistence adapter backed by an in-memory database.
    ///
    /// Each call receives a unique database instance via atomic counter,
    /// ensuring deterministic test isolation without time-based collisions.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn new_in_memory() -> Result<Self, PersistenceError> {
        let db_id: u64 = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let url: String = format!("file:paceline_memdb_{db_id}?mode=memory&cache=shared");
        let pool: sqlite::SqlitePool = sqlite::build_pool(&url, DEFAULT_POOL_SIZE)?;
        Ok(Self { pool })
    }

    /// Creates a persistence adapter backed by a database file.
    ///
    /// Enables WAL mode for better read concurrency.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new_with_file<P: AsRef<Path>>(path: P, pool_size: u32) -> Result<Self, PersistenceError> {
        let path_str: &str = path.as_ref().to_str().ok_or_else(|| {
            PersistenceError::ConnectionFailed(String::from("database path is not valid UTF-8"))
        })?;
        let pool: sqlite::SqlitePool = sqlite::build_pool(path_str, pool_size)?;
        let mut conn = pool.get()?;
        sqlite::enable_wal_mode(&mut conn)?;
        drop(conn);
        Ok(Self { pool })
    }

    /// Creates a persistence adapter from a `DATABASE_URL`-style string.
    ///
    /// Plain paths and `file:` URIs are handled alike; WAL mode is enabled
    /// for anything that is not an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn from_database_url(url: &str, pool_size: u32) -> Result<Self, PersistenceError> {
        let pool: sqlite::SqlitePool = sqlite::build_pool(url, pool_size)?;
        if !url.contains(":memory:") && !url.contains("mode=memory") {
            let mut conn = pool.get()?;
            sqlite::enable_wal_mode(&mut conn)?;
        }
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<sqlite::SqlitePooledConnection, PersistenceError> {
        self.pool.get().map_err(PersistenceError::from)
    }

    // ========================================================================
    // Calendar & runs
    // ========================================================================

    /// Sets `has_run` for a date and materialises or deactivates its run.
    ///
    /// `fresh_code` is consumed only when a new run is created; reactivation
    /// and no-op paths keep the run's original code.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::UniqueViolation`] when `fresh_code`
    /// collided with a concurrently issued code; callers retry with a new
    /// code.
    pub fn upsert_calendar_day(
        &self,
        date: NaiveDate,
        has_run: bool,
        fresh_code: &SessionCode,
        now: NaiveDateTime,
    ) -> Result<Option<Run>, PersistenceError> {
        let mut conn = self.conn()?;
        mutations::upsert_calendar_day(&mut conn, date, has_run, fresh_code, now)
    }

    /// Point lookup of the run scheduled on a date, active or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be queried.
    pub fn run_by_date(&self, date: NaiveDate) -> Result<Option<Run>, PersistenceError> {
        let mut conn = self.conn()?;
        queries::run_by_date(&mut conn, date)
    }

    /// Point lookup of a run by session code, active or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be queried.
    pub fn run_by_code(&self, code: &SessionCode) -> Result<Option<Run>, PersistenceError> {
        let mut conn = self.conn()?;
        queries::run_by_code(&mut conn, code.value())
    }

    /// Returns whether a session code has ever been issued.
    ///
    /// Used by the code issuer as its collision probe; the `UNIQUE`
    /// constraint on `runs.session_code` remains the backstop.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be queried.
    pub fn session_code_exists(&self, code: &SessionCode) -> Result<bool, PersistenceError> {
        let mut conn = self.conn()?;
        queries::session_code_exists(&mut conn, code.value())
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Registers a runner for a run; at-most-once per `(run, runner)`.
    ///
    /// The run's `is_active` flag is re-checked inside the transaction, so a
    /// concurrently deactivated run yields [`RegisterResult::Inactive`], not
    /// a spurious duplicate.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure failures; business outcomes
    /// (duplicate, unknown run, inactive run) are values of
    /// [`RegisterResult`].
    pub fn register(
        &self,
        run_id: i64,
        runner_id: &str,
        registered_at: NaiveDateTime,
    ) -> Result<RegisterResult, PersistenceError> {
        let mut conn = self.conn()?;
        mutations::register(&mut conn, run_id, runner_id, registered_at)
    }

    /// Counts attendances for a run.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be queried.
    pub fn count_for_run(&self, run_id: i64) -> Result<i64, PersistenceError> {
        let mut conn = self.conn()?;
        queries::count_for_run(&mut conn, run_id)
    }

    /// Lists all attendances for a run, in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be queried.
    pub fn attendances_for_run(&self, run_id: i64) -> Result<Vec<Attendance>, PersistenceError> {
        let mut conn = self.conn()?;
        queries::attendances_for_run(&mut conn, run_id)
    }

    // ========================================================================
    // History & export
    // ========================================================================

    /// One page of attendance history plus the total count for the range.
    ///
    /// Ordered by `(run_date desc, registered_at asc)`. An inverted range
    /// yields an empty page, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be queried.
    pub fn history(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<HistoryRow>, i64), PersistenceError> {
        let mut conn = self.conn()?;
        queries::history(&mut conn, start, end, limit, offset)
    }

    /// Streams the full history for a range through `sink` in bounded
    /// batches, inside one read transaction.
    ///
    /// Memory use is bounded regardless of range size. Returns the number of
    /// rows emitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be queried or the sink fails.
    pub fn stream_history<F>(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        sink: &mut F,
    ) -> Result<usize, PersistenceError>
    where
        F: FnMut(HistoryRow) -> Result<(), PersistenceError>,
    {
        let mut conn = self.conn()?;
        queries::stream_history(&mut conn, start, end, sink)
    }

    /// Calendar days in a range, each joined with its run's code and tally.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be queried.
    pub fn calendar_days(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CalendarDayOverview>, PersistenceError> {
        let mut conn = self.conn()?;
        queries::calendar_days(&mut conn, start, end)
    }
}
