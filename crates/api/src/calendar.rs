// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Calendar management: translating "date D has a run" into a materialised
//! run with a discoverable session code.
//!
//! All date interpretation goes through the configured time zone; "today"
//! changes at local midnight and nowhere else.

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use paceline_domain::{Run, SessionCode};
use paceline_persistence::{CalendarDayOverview, Persistence, PersistenceError};
use tracing::{debug, info};

use crate::codes::CodeIssuer;
use crate::error::ApiError;

/// How many fresh codes to try when a materialising upsert loses a
/// uniqueness race.
const MAX_MATERIALISE_ATTEMPTS: usize = 4;

/// Today's run status as served to dashboards and check-in clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodayStatus {
    /// Whether today is marked as a run day.
    pub has_run: bool,
    /// The active run, when one is materialised.
    pub run: Option<Run>,
    /// Today's tally; zero when there is no run.
    pub count: i64,
}

/// Computes the first and last day of a calendar month.
///
/// # Errors
///
/// Returns `Malformed` if the year/month pair is not a valid month.
pub fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), ApiError> {
    let first: NaiveDate = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
        ApiError::Malformed {
            message: format!("'{year}-{month:02}' is not a valid month"),
        }
    })?;
    let next_first: NaiveDate = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| ApiError::Internal {
        message: String::from("month arithmetic overflowed"),
    })?;
    let last: NaiveDate = next_first.pred_opt().ok_or_else(|| ApiError::Internal {
        message: String::from("month arithmetic overflowed"),
    })?;
    Ok((first, last))
}

/// Maps dates to runs and materialises runs on demand.
#[derive(Debug, Clone, Copy)]
pub struct CalendarManager {
    tz: Tz,
}

impl CalendarManager {
    /// Creates a manager for the configured time zone.
    #[must_use]
    pub const fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Today's date in the configured time zone.
    #[must_use]
    pub fn today_date(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    /// Sets `has_run` for a date, materialising a run (with a freshly issued
    /// session code) or deactivating the existing one.
    ///
    /// Configuring a past date is permitted; it retro-marks a historical run.
    /// Whether that run admits registrations is governed solely by
    /// `is_active` and the current-day rule on the registration path.
    ///
    /// # Errors
    ///
    /// Returns an error if code issuance or the store transaction fails.
    pub fn configure(
        &self,
        store: &Persistence,
        issuer: &CodeIssuer,
        date: NaiveDate,
        has_run: bool,
    ) -> Result<Option<Run>, ApiError> {
        let mut attempts: usize = 0;
        loop {
            let fresh: SessionCode = issuer.new_session_code(store)?;
            match store.upsert_calendar_day(date, has_run, &fresh, Utc::now().naive_utc()) {
                Ok(run) => {
                    info!(%date, has_run, run_id = ?run.as_ref().map(|r| r.id), "Configured calendar day");
                    return Ok(run);
                }
                Err(PersistenceError::UniqueViolation(msg)) => {
                    attempts += 1;
                    debug!(%date, attempts, msg, "Session code lost uniqueness race, retrying");
                    if attempts >= MAX_MATERIALISE_ATTEMPTS {
                        return Err(ApiError::Internal {
                            message: String::from("could not materialise run with a unique code"),
                        });
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Today's run status: `{ has_run, session_code?, count? }`.
    ///
    /// If the calendar says today has a run but no run row exists (possible
    /// only through manual store edits), the day is still reported as a run
    /// day, with no code and a zero count.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    pub fn today(&self, store: &Persistence) -> Result<TodayStatus, ApiError> {
        let today: NaiveDate = self.today_date();

        if let Some(run) = store.run_by_date(today)?
            && run.is_active
        {
            let count: i64 = store.count_for_run(run.id)?;
            return Ok(TodayStatus {
                has_run: true,
                run: Some(run),
                count,
            });
        }

        // No active run; fall back to the calendar entry so a configured but
        // unmaterialised day still reads as a run day.
        let days: Vec<CalendarDayOverview> = store.calendar_days(today, today)?;
        let has_run: bool = days.first().is_some_and(|d| d.day.has_run);
        Ok(TodayStatus {
            has_run,
            run: None,
            count: 0,
        })
    }

    /// Calendar days overlapping the given range, joined with each run's
    /// code and tally.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    pub fn days(
        &self,
        store: &Persistence,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CalendarDayOverview>, ApiError> {
        Ok(store.calendar_days(start, end)?)
    }
}
