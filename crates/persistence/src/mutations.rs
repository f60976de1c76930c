// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Write-side mutations.
//!
//! Each public function here is one logical transaction. The at-most-once
//! registration guarantee is delegated entirely to the database's
//! `UNIQUE(run_id, runner_id)` constraint; no application-level locking.

use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use paceline_domain::{Run, SessionCode};
use tracing::{debug, info};

use crate::data_models::{RunRow, format_date, format_timestamp};
use crate::diesel_schema::{attendances, calendar_config, runs};
use crate::error::PersistenceError;
use crate::queries;

/// Outcome of a registration attempt, as decided by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterResult {
    /// The attendance row was inserted; carries the post-commit tally.
    Registered(i64),
    /// The `(run_id, runner_id)` pair already existed; carries the
    /// unchanged tally.
    Duplicate(i64),
    /// No run with the given id exists.
    NoSuchRun,
    /// The run exists but no longer admits registrations.
    Inactive,
}

/// Sets `has_run` for a date and materialises or deactivates its run.
///
/// In one transaction:
/// - the calendar entry is inserted or updated;
/// - on `has_run = true`, a run is created with `fresh_code` if none exists
///   for the date, or an existing inactive run is reactivated (keeping its
///   original code);
/// - on `has_run = false`, an existing run is marked inactive.
///
/// Returns the affected run, if any. The caller supplies `fresh_code`
/// up front so code issuance stays outside the transaction; the code is
/// simply unused when an existing run is found.
///
/// # Errors
///
/// Returns [`PersistenceError::UniqueViolation`] if `fresh_code` lost a race
/// with a concurrent insert; callers retry with a new code.
pub(crate) fn upsert_calendar_day(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    has_run: bool,
    fresh_code: &SessionCode,
    now: NaiveDateTime,
) -> Result<Option<Run>, PersistenceError> {
    conn.immediate_transaction::<Option<Run>, PersistenceError, _>(|conn| {
        let date_s: String = format_date(date);
        let now_s: String = format_timestamp(now);

        diesel::insert_into(calendar_config::table)
            .values((
                calendar_config::date.eq(&date_s),
                calendar_config::has_run.eq(i32::from(has_run)),
                calendar_config::updated_at.eq(&now_s),
            ))
            .on_conflict(calendar_config::date)
            .do_update()
            .set((
                calendar_config::has_run.eq(i32::from(has_run)),
                calendar_config::updated_at.eq(&now_s),
            ))
            .execute(conn)?;

        let existing: Option<Run> = queries::run_by_date(conn, date)?;

        if has_run {
            match existing {
                Some(run) if run.is_active => {
                    debug!(run_id = run.id, %date, "Run already materialised");
                    Ok(Some(run))
                }
                Some(mut run) => {
                    diesel::update(runs::table.filter(runs::id.eq(run.id)))
                        .set(runs::is_active.eq(1))
                        .execute(conn)?;
                    run.is_active = true;
                    info!(run_id = run.id, %date, "Reactivated run");
                    Ok(Some(run))
                }
                None => {
                    diesel::insert_into(runs::table)
                        .values((
                            runs::date.eq(&date_s),
                            runs::session_code.eq(fresh_code.value()),
                            runs::is_active.eq(1),
                            runs::created_at.eq(&now_s),
                        ))
                        .execute(conn)?;
                    let created: Run = queries::run_by_date(conn, date)?.ok_or_else(|| {
                        PersistenceError::QueryFailed(String::from(
                            "run vanished immediately after insert",
                        ))
                    })?;
                    info!(
                        run_id = created.id,
                        %date,
                        session_code = %created.session_code,
                        "Materialised run"
                    );
                    Ok(Some(created))
                }
            }
        } else {
            match existing {
                Some(mut run) => {
                    if run.is_active {
                        diesel::update(runs::table.filter(runs::id.eq(run.id)))
                            .set(runs::is_active.eq(0))
                            .execute(conn)?;
                        info!(run_id = run.id, %date, "Deactivated run");
                    }
                    run.is_active = false;
                    Ok(Some(run))
                }
                None => Ok(None),
            }
        }
    })
}

/// Registers a runner for a run.
///
/// In one transaction: the run is re-read (its `is_active` flag can change
/// concurrently), the attendance is inserted with `ON CONFLICT DO NOTHING`,
/// and the tally is read back. A conflict on `(run_id, runner_id)` is the
/// only way the insert can affect zero rows, so zero rows means
/// [`RegisterResult::Duplicate`].
pub(crate) fn register(
    conn: &mut SqliteConnection,
    run_id: i64,
    runner_id: &str,
    registered_at: NaiveDateTime,
) -> Result<RegisterResult, PersistenceError> {
    conn.immediate_transaction::<RegisterResult, PersistenceError, _>(|conn| {
        let run: Option<RunRow> = runs::table
            .filter(runs::id.eq(run_id))
            .select(RunRow::as_select())
            .first(conn)
            .optional()?;

        let Some(run) = run else {
            return Ok(RegisterResult::NoSuchRun);
        };
        if run.is_active == 0 {
            return Ok(RegisterResult::Inactive);
        }

        let inserted: usize = diesel::insert_into(attendances::table)
            .values((
                attendances::run_id.eq(run_id),
                attendances::runner_id.eq(runner_id),
                attendances::registered_at.eq(format_timestamp(registered_at)),
            ))
            .on_conflict_do_nothing()
            .execute(conn)?;

        let count: i64 = queries::count_for_run(conn, run_id)?;

        if inserted == 0 {
            debug!(run_id, runner_id, count, "Duplicate registration suppressed");
            Ok(RegisterResult::Duplicate(count))
        } else {
            info!(run_id, runner_id, count, "Registered attendance");
            Ok(RegisterResult::Registered(count))
        }
    })
}
