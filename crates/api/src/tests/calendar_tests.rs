// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use super::{test_issuer, test_store};
use crate::calendar::{CalendarManager, month_bounds};
use crate::codes::CodeIssuer;
use chrono::NaiveDate;
use chrono_tz::Tz;
use paceline_persistence::Persistence;

fn manager() -> CalendarManager {
    CalendarManager::new(Tz::UTC)
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("test date")
}

#[test]
fn configure_twice_yields_the_same_run_and_code() {
    let store: Persistence = test_store();
    let issuer: CodeIssuer = test_issuer();
    let calendar: CalendarManager = manager();

    let first = calendar
        .configure(&store, &issuer, date("2025-03-10"), true)
        .expect("configure")
        .expect("run");
    let second = calendar
        .configure(&store, &issuer, date("2025-03-10"), true)
        .expect("configure")
        .expect("run");

    assert_eq!(first.id, second.id);
    assert_eq!(first.session_code, second.session_code);
}

#[test]
fn configure_off_then_on_reuses_the_original_code() {
    let store: Persistence = test_store();
    let issuer: CodeIssuer = test_issuer();
    let calendar: CalendarManager = manager();

    let original = calendar
        .configure(&store, &issuer, date("2025-03-10"), true)
        .expect("configure")
        .expect("run");
    calendar
        .configure(&store, &issuer, date("2025-03-10"), false)
        .expect("deactivate");
    let revived = calendar
        .configure(&store, &issuer, date("2025-03-10"), true)
        .expect("reactivate")
        .expect("run");

    assert_eq!(revived.session_code, original.session_code);
    assert!(revived.is_active);
}

#[test]
fn today_reports_no_run_on_an_unconfigured_day() {
    let store: Persistence = test_store();
    let status = manager().today(&store).expect("today");
    assert!(!status.has_run);
    assert!(status.run.is_none());
    assert_eq!(status.count, 0);
}

#[test]
fn today_reports_the_active_run_and_tally() {
    let store: Persistence = test_store();
    let issuer: CodeIssuer = test_issuer();
    let calendar: CalendarManager = manager();

    let today = calendar.today_date();
    let run = calendar
        .configure(&store, &issuer, today, true)
        .expect("configure")
        .expect("run");
    store
        .register(run.id, "alice", chrono::Utc::now().naive_utc())
        .expect("register");

    let status = calendar.today(&store).expect("today");
    assert!(status.has_run);
    assert_eq!(status.run.expect("run").id, run.id);
    assert_eq!(status.count, 1);
}

#[test]
fn today_on_a_deactivated_run_day_reads_as_no_run() {
    let store: Persistence = test_store();
    let issuer: CodeIssuer = test_issuer();
    let calendar: CalendarManager = manager();

    let today = calendar.today_date();
    calendar
        .configure(&store, &issuer, today, true)
        .expect("configure");
    calendar
        .configure(&store, &issuer, today, false)
        .expect("deactivate");

    let status = calendar.today(&store).expect("today");
    assert!(!status.has_run);
    assert!(status.run.is_none());
}

#[test]
fn month_bounds_cover_whole_months() {
    assert_eq!(
        month_bounds(2025, 3).expect("march"),
        (date("2025-03-01"), date("2025-03-31"))
    );
    assert_eq!(
        month_bounds(2025, 12).expect("december"),
        (date("2025-12-01"), date("2025-12-31"))
    );
    assert_eq!(
        month_bounds(2024, 2).expect("leap february"),
        (date("2024-02-01"), date("2024-02-29"))
    );
}

#[test]
fn month_bounds_reject_invalid_months() {
    assert!(month_bounds(2025, 0).is_err());
    assert!(month_bounds(2025, 13).is_err());
}

#[test]
fn days_join_runs_for_the_month() {
    let store: Persistence = test_store();
    let issuer: CodeIssuer = test_issuer();
    let calendar: CalendarManager = manager();

    let run = calendar
        .configure(&store, &issuer, date("2025-03-10"), true)
        .expect("configure")
        .expect("run");
    store
        .register(run.id, "alice", chrono::Utc::now().naive_utc())
        .expect("register");
    store
        .register(run.id, "bob", chrono::Utc::now().naive_utc())
        .expect("register");

    let (start, end) = month_bounds(2025, 3).expect("bounds");
    let days = calendar.days(&store, start, end).expect("days");
    assert_eq!(days.len(), 1);
    assert_eq!(days[0].attendance_count, Some(2));
    assert_eq!(
        days[0].session_code.as_deref(),
        Some(run.session_code.value())
    );
}
