// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use super::{code, date, materialise_run, test_store, ts};
use crate::{Persistence, PersistenceError};

#[test]
fn marking_a_day_materialises_a_run() {
    let store: Persistence = test_store();
    let run = materialise_run(&store, "2025-03-10", "A7K2P");

    assert_eq!(run.date, date("2025-03-10"));
    assert_eq!(run.session_code.value(), "A7K2P");
    assert!(run.is_active);
}

#[test]
fn marking_the_same_day_twice_keeps_the_run_and_code() {
    let store: Persistence = test_store();
    let first = materialise_run(&store, "2025-03-10", "A7K2P");
    // Second call supplies a different candidate code; it must be ignored.
    let second = materialise_run(&store, "2025-03-10", "ZZZZ9");

    assert_eq!(first.id, second.id);
    assert_eq!(second.session_code.value(), "A7K2P");
}

#[test]
fn unmarking_a_day_deactivates_but_keeps_the_run() {
    let store: Persistence = test_store();
    let run = materialise_run(&store, "2025-03-10", "A7K2P");

    let deactivated = store
        .upsert_calendar_day(date("2025-03-10"), false, &code("UNUSE"), ts("2025-03-10 09:00:00"))
        .expect("upsert")
        .expect("run still present");
    assert_eq!(deactivated.id, run.id);
    assert!(!deactivated.is_active);

    // The row survives for history.
    let found = store
        .run_by_date(date("2025-03-10"))
        .expect("lookup")
        .expect("run retained");
    assert!(!found.is_active);
}

#[test]
fn remarking_a_day_reactivates_with_the_original_code() {
    let store: Persistence = test_store();
    let original = materialise_run(&store, "2025-03-10", "A7K2P");

    store
        .upsert_calendar_day(date("2025-03-10"), false, &code("UNUSE"), ts("2025-03-10 09:00:00"))
        .expect("deactivate");

    let reactivated = materialise_run(&store, "2025-03-10", "NEWCO");
    assert_eq!(reactivated.id, original.id);
    assert_eq!(reactivated.session_code.value(), "A7K2P");
    assert!(reactivated.is_active);
}

#[test]
fn unmarking_a_day_with_no_run_is_a_noop() {
    let store: Persistence = test_store();
    let result = store
        .upsert_calendar_day(date("2025-03-10"), false, &code("UNUSE"), ts("2025-03-10 09:00:00"))
        .expect("upsert");
    assert!(result.is_none());
}

#[test]
fn duplicate_session_code_is_rejected_by_the_store() {
    let store: Persistence = test_store();
    materialise_run(&store, "2025-03-10", "A7K2P");

    let err = store
        .upsert_calendar_day(date("2025-03-11"), true, &code("A7K2P"), ts("2025-03-11 08:00:00"))
        .expect_err("reused code must violate uniqueness");
    assert!(matches!(err, PersistenceError::UniqueViolation(_)));
}

#[test]
fn run_lookup_by_code_is_case_exact() {
    let store: Persistence = test_store();
    materialise_run(&store, "2025-03-10", "A7K2P");

    let found = store
        .run_by_code(&code("A7K2P"))
        .expect("lookup")
        .expect("run found");
    assert_eq!(found.date, date("2025-03-10"));

    assert!(store.run_by_code(&code("ZZZZZ")).expect("lookup").is_none());
}

#[test]
fn session_code_existence_probe() {
    let store: Persistence = test_store();
    assert!(!store.session_code_exists(&code("A7K2P")).expect("probe"));
    materialise_run(&store, "2025-03-10", "A7K2P");
    assert!(store.session_code_exists(&code("A7K2P")).expect("probe"));
}

#[test]
fn calendar_days_join_code_and_tally() {
    let store: Persistence = test_store();
    let run = materialise_run(&store, "2025-03-10", "A7K2P");
    store
        .upsert_calendar_day(date("2025-03-12"), false, &code("UNUSE"), ts("2025-03-12 08:00:00"))
        .expect("rest day");
    store
        .register(run.id, "alice", ts("2025-03-10 18:00:00"))
        .expect("register");

    let days = store
        .calendar_days(date("2025-03-01"), date("2025-03-31"))
        .expect("calendar");
    assert_eq!(days.len(), 2);

    assert_eq!(days[0].day.date, date("2025-03-10"));
    assert!(days[0].day.has_run);
    assert_eq!(days[0].session_code.as_deref(), Some("A7K2P"));
    assert_eq!(days[0].attendance_count, Some(1));

    assert_eq!(days[1].day.date, date("2025-03-12"));
    assert!(!days[1].day.has_run);
    assert!(days[1].session_code.is_none());
    assert!(days[1].attendance_count.is_none());
}

#[test]
fn calendar_days_empty_range_is_empty() {
    let store: Persistence = test_store();
    materialise_run(&store, "2025-03-10", "A7K2P");
    let days = store
        .calendar_days(date("2025-04-01"), date("2025-04-30"))
        .expect("calendar");
    assert!(days.is_empty());
}
