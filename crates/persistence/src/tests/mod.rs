// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

mod calendar_tests;
mod history_tests;

use crate::Persistence;
use chrono::{NaiveDate, NaiveDateTime};
use paceline_domain::SessionCode;

pub fn test_store() -> Persistence {
    Persistence::new_in_memory().expect("in-memory store")
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("test date")
}

pub fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").expect("test timestamp")
}

pub fn code(s: &str) -> SessionCode {
    SessionCode::from_trusted(s.to_string())
}

/// Marks a date as a run day with the given candidate code and returns the
/// materialised run.
pub fn materialise_run(store: &Persistence, day: &str, candidate: &str) -> paceline_domain::Run {
    store
        .upsert_calendar_day(date(day), true, &code(candidate), ts("2025-03-10 08:00:00"))
        .expect("upsert")
        .expect("run materialised")
}
