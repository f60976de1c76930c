// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Read-side queries.
//!
//! All functions take an already checked-out connection; transaction scoping
//! is decided by the caller where it matters (history streaming runs inside
//! one transaction so paging sees a consistent snapshot).

use chrono::NaiveDate;
use diesel::prelude::*;
use paceline_domain::{Attendance, CalendarDay, Run};
use tracing::debug;

use crate::data_models::{
    AttendanceRow, CalendarDayOverview, CalendarRow, HistoryRow, RunRow, format_date, parse_date,
    parse_timestamp,
};
use crate::diesel_schema::{attendances, calendar_config, runs};
use crate::error::PersistenceError;

/// Number of rows fetched per round-trip when streaming history.
const STREAM_BATCH_SIZE: i64 = 512;

/// Looks up the run scheduled on a given date, active or not.
pub(crate) fn run_by_date(
    conn: &mut SqliteConnection,
    date: NaiveDate,
) -> Result<Option<Run>, PersistenceError> {
    let row: Option<RunRow> = runs::table
        .filter(runs::date.eq(format_date(date)))
        .select(RunRow::as_select())
        .first(conn)
        .optional()?;
    row.map(RunRow::into_run).transpose()
}

/// Looks up a run by its session code, active or not.
pub(crate) fn run_by_code(
    conn: &mut SqliteConnection,
    code: &str,
) -> Result<Option<Run>, PersistenceError> {
    let row: Option<RunRow> = runs::table
        .filter(runs::session_code.eq(code))
        .select(RunRow::as_select())
        .first(conn)
        .optional()?;
    row.map(RunRow::into_run).transpose()
}

/// Returns whether a session code has ever been issued.
pub(crate) fn session_code_exists(
    conn: &mut SqliteConnection,
    code: &str,
) -> Result<bool, PersistenceError> {
    let count: i64 = runs::table
        .filter(runs::session_code.eq(code))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

/// Counts attendances for a run.
pub(crate) fn count_for_run(
    conn: &mut SqliteConnection,
    run_id: i64,
) -> Result<i64, PersistenceError> {
    let count: i64 = attendances::table
        .filter(attendances::run_id.eq(run_id))
        .count()
        .get_result(conn)?;
    Ok(count)
}

/// Lists all attendances for a run, in registration order.
pub(crate) fn attendances_for_run(
    conn: &mut SqliteConnection,
    run_id: i64,
) -> Result<Vec<Attendance>, PersistenceError> {
    let rows: Vec<AttendanceRow> = attendances::table
        .filter(attendances::run_id.eq(run_id))
        .order(attendances::registered_at.asc())
        .select(AttendanceRow::as_select())
        .load(conn)?;
    rows.into_iter().map(AttendanceRow::into_attendance).collect()
}

type HistoryTuple = (i64, String, String, String, String);

fn history_tuple_to_row(tuple: HistoryTuple) -> Result<HistoryRow, PersistenceError> {
    let (id, run_date, runner_id, registered_at, session_code) = tuple;
    Ok(HistoryRow {
        id,
        run_date: parse_date(&run_date)?,
        runner_id,
        registered_at: parse_timestamp(&registered_at)?,
        session_code,
    })
}

/// One page of attendance history plus the total row count for the range.
///
/// Rows are ordered by `(run_date desc, registered_at asc)`: the most recent
/// run first, attendances within a run in arrival order. An inverted range
/// yields an empty page, not an error.
pub(crate) fn history(
    conn: &mut SqliteConnection,
    start: NaiveDate,
    end: NaiveDate,
    limit: i64,
    offset: i64,
) -> Result<(Vec<HistoryRow>, i64), PersistenceError> {
    let start_s: String = format_date(start);
    let end_s: String = format_date(end);

    let total: i64 = attendances::table
        .inner_join(runs::table)
        .filter(runs::date.between(start_s.clone(), end_s.clone()))
        .count()
        .get_result(conn)?;

    let tuples: Vec<HistoryTuple> = attendances::table
        .inner_join(runs::table)
        .filter(runs::date.between(start_s, end_s))
        .order((runs::date.desc(), attendances::registered_at.asc()))
        .select((
            attendances::id,
            runs::date,
            attendances::runner_id,
            attendances::registered_at,
            runs::session_code,
        ))
        .limit(limit)
        .offset(offset)
        .load(conn)?;

    debug!(total, page_len = tuples.len(), "Loaded history page");

    let rows: Vec<HistoryRow> = tuples
        .into_iter()
        .map(history_tuple_to_row)
        .collect::<Result<_, _>>()?;
    Ok((rows, total))
}

/// Streams the full history for a range through `sink` in bounded batches.
///
/// The whole walk runs inside one read transaction so pagination offsets are
/// stable against concurrent writers. Returns the number of rows emitted.
pub(crate) fn stream_history<F>(
    conn: &mut SqliteConnection,
    start: NaiveDate,
    end: NaiveDate,
    sink: &mut F,
) -> Result<usize, PersistenceError>
where
    F: FnMut(HistoryRow) -> Result<(), PersistenceError>,
{
    let start_s: String = format_date(start);
    let end_s: String = format_date(end);

    conn.transaction::<usize, PersistenceError, _>(|conn| {
        let mut emitted: usize = 0;
        loop {
            let tuples: Vec<HistoryTuple> = attendances::table
                .inner_join(runs::table)
                .filter(runs::date.between(start_s.clone(), end_s.clone()))
                .order((runs::date.desc(), attendances::registered_at.asc()))
                .select((
                    attendances::id,
                    runs::date,
                    attendances::runner_id,
                    attendances::registered_at,
                    runs::session_code,
                ))
                .limit(STREAM_BATCH_SIZE)
                .offset(i64::try_from(emitted).unwrap_or(i64::MAX))
                .load(conn)?;

            let batch_len: usize = tuples.len();
            for tuple in tuples {
                sink(history_tuple_to_row(tuple)?)?;
            }
            emitted += batch_len;

            if i64::try_from(batch_len).unwrap_or(0) < STREAM_BATCH_SIZE {
                break;
            }
        }
        debug!(emitted, "Streamed history rows");
        Ok(emitted)
    })
}

/// Calendar days in a range, each joined with its run's code and tally.
pub(crate) fn calendar_days(
    conn: &mut SqliteConnection,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<CalendarDayOverview>, PersistenceError> {
    conn.transaction::<Vec<CalendarDayOverview>, PersistenceError, _>(|conn| {
        let config_rows: Vec<CalendarRow> = calendar_config::table
            .filter(calendar_config::date.between(format_date(start), format_date(end)))
            .order(calendar_config::date.asc())
            .select(CalendarRow::as_select())
            .load(conn)?;

        let mut days: Vec<CalendarDayOverview> = Vec::with_capacity(config_rows.len());
        for config in config_rows {
            let day: CalendarDay = CalendarDay {
                date: parse_date(&config.date)?,
                has_run: config.has_run != 0,
            };

            let mut overview: CalendarDayOverview = CalendarDayOverview {
                day,
                session_code: None,
                attendance_count: None,
            };

            if day.has_run
                && let Some(run) = run_by_date(conn, day.date)?
                && run.is_active
            {
                overview.attendance_count = Some(count_for_run(conn, run.id)?);
                overview.session_code = Some(run.session_code.value().to_string());
            }

            days.push(overview);
        }
        Ok(days)
    })
}
