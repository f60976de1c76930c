// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Row structs and their conversions into domain types.
//!
//! Dates and timestamps are persisted as ISO 8601 text; conversion back into
//! `chrono` types lives here so query code stays free of format strings.

use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use paceline_domain::{Attendance, CalendarDay, Run, RunnerId, SessionCode};

use crate::diesel_schema::{attendances, calendar_config, runs};
use crate::error::PersistenceError;

/// Storage format for calendar dates.
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

/// Storage format for timestamps (UTC, second precision).
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, PersistenceError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| PersistenceError::CorruptRow(format!("bad date '{raw}': {e}")))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, PersistenceError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map_err(|e| PersistenceError::CorruptRow(format!("bad timestamp '{raw}': {e}")))
}

/// Diesel Queryable struct for run rows.
#[derive(Queryable, Selectable)]
#[diesel(table_name = runs)]
pub(crate) struct RunRow {
    pub id: i64,
    pub date: String,
    pub session_code: String,
    pub is_active: i32,
    #[allow(dead_code)]
    pub created_at: String,
}

impl RunRow {
    pub(crate) fn into_run(self) -> Result<Run, PersistenceError> {
        Ok(Run {
            id: self.id,
            date: parse_date(&self.date)?,
            session_code: SessionCode::from_trusted(self.session_code),
            is_active: self.is_active != 0,
        })
    }
}

/// Diesel Queryable struct for attendance rows.
#[derive(Queryable, Selectable)]
#[diesel(table_name = attendances)]
pub(crate) struct AttendanceRow {
    pub id: i64,
    pub run_id: i64,
    pub runner_id: String,
    pub registered_at: String,
}

impl AttendanceRow {
    pub(crate) fn into_attendance(self) -> Result<Attendance, PersistenceError> {
        let runner_id: RunnerId = RunnerId::parse(&self.runner_id, usize::MAX).map_err(|e| {
            PersistenceError::CorruptRow(format!("bad runner id for attendance {}: {e}", self.id))
        })?;
        Ok(Attendance {
            id: self.id,
            run_id: self.run_id,
            runner_id,
            registered_at: parse_timestamp(&self.registered_at)?,
        })
    }
}

/// Diesel Queryable struct for calendar rows.
#[derive(Queryable, Selectable)]
#[diesel(table_name = calendar_config)]
pub(crate) struct CalendarRow {
    pub date: String,
    pub has_run: i32,
    #[allow(dead_code)]
    pub updated_at: String,
}

/// One row of the attendance history, joined with its run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRow {
    /// Attendance identifier.
    pub id: i64,
    /// The date of the run the attendance belongs to.
    pub run_date: NaiveDate,
    /// The runner identifier as registered.
    pub runner_id: String,
    /// Registration timestamp (UTC).
    pub registered_at: NaiveDateTime,
    /// The run's session code.
    pub session_code: String,
}

/// A calendar day joined with its run's code and attendance count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarDayOverview {
    /// The calendar entry.
    pub day: CalendarDay,
    /// The active run's session code, when one exists.
    pub session_code: Option<String>,
    /// The attendance count for the run, when one exists.
    pub attendance_count: Option<i64>,
}
