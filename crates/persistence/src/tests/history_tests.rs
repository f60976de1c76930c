// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use super::{date, materialise_run, test_store, ts};
use crate::{HistoryRow, Persistence, PersistenceError};

/// Two runs: 2025-03-10 with Alice and Bob, 2025-03-12 with Carol.
fn seeded_store() -> Persistence {
    let store: Persistence = test_store();
    let monday = materialise_run(&store, "2025-03-10", "A7K2P");
    let wednesday = materialise_run(&store, "2025-03-12", "B8M3Q");
    store
        .register(monday.id, "Alice", ts("2025-03-10 18:00:00"))
        .expect("register");
    store
        .register(monday.id, "Bob", ts("2025-03-10 18:05:00"))
        .expect("register");
    store
        .register(wednesday.id, "Carol", ts("2025-03-12 18:00:00"))
        .expect("register");
    store
}

#[test]
fn history_orders_by_date_desc_then_registration_asc() {
    let store: Persistence = seeded_store();
    let (rows, total) = store
        .history(date("2025-03-01"), date("2025-03-31"), 50, 0)
        .expect("history");

    assert_eq!(total, 3);
    let order: Vec<&str> = rows.iter().map(|r| r.runner_id.as_str()).collect();
    assert_eq!(order, vec!["Carol", "Alice", "Bob"]);
    assert_eq!(rows[0].session_code, "B8M3Q");
    assert_eq!(rows[1].run_date, date("2025-03-10"));
}

#[test]
fn history_pages_without_overlap() {
    let store: Persistence = seeded_store();
    let (page1, total) = store
        .history(date("2025-03-01"), date("2025-03-31"), 2, 0)
        .expect("page 1");
    let (page2, _) = store
        .history(date("2025-03-01"), date("2025-03-31"), 2, 2)
        .expect("page 2");

    assert_eq!(total, 3);
    assert_eq!(page1.len(), 2);
    assert_eq!(page2.len(), 1);
    assert_eq!(page2[0].runner_id, "Bob");
}

#[test]
fn history_respects_range_bounds() {
    let store: Persistence = seeded_store();
    let (rows, total) = store
        .history(date("2025-03-11"), date("2025-03-31"), 50, 0)
        .expect("history");
    assert_eq!(total, 1);
    assert_eq!(rows[0].runner_id, "Carol");
}

#[test]
fn history_with_inverted_range_is_empty_not_an_error() {
    let store: Persistence = seeded_store();
    let (rows, total) = store
        .history(date("2025-03-31"), date("2025-03-01"), 50, 0)
        .expect("history");
    assert!(rows.is_empty());
    assert_eq!(total, 0);
}

#[test]
fn history_includes_inactive_runs() {
    let store: Persistence = seeded_store();
    store
        .upsert_calendar_day(
            date("2025-03-10"),
            false,
            &super::code("UNUSE"),
            ts("2025-03-13 08:00:00"),
        )
        .expect("deactivate");

    let (_, total) = store
        .history(date("2025-03-01"), date("2025-03-31"), 50, 0)
        .expect("history");
    assert_eq!(total, 3);
}

#[test]
fn stream_history_emits_every_row_in_page_order() {
    let store: Persistence = seeded_store();
    let mut seen: Vec<HistoryRow> = Vec::new();
    let emitted: usize = store
        .stream_history(date("2025-03-01"), date("2025-03-31"), &mut |row| {
            seen.push(row);
            Ok(())
        })
        .expect("stream");

    assert_eq!(emitted, 3);
    let order: Vec<&str> = seen.iter().map(|r| r.runner_id.as_str()).collect();
    assert_eq!(order, vec!["Carol", "Alice", "Bob"]);
}

#[test]
fn stream_history_over_empty_range_emits_nothing() {
    let store: Persistence = seeded_store();
    let mut count: usize = 0;
    let emitted: usize = store
        .stream_history(date("2025-04-01"), date("2025-04-30"), &mut |_| {
            count += 1;
            Ok(())
        })
        .expect("stream");
    assert_eq!(emitted, 0);
    assert_eq!(count, 0);
}

#[test]
fn stream_history_propagates_sink_errors() {
    let store: Persistence = seeded_store();
    let err = store
        .stream_history(date("2025-03-01"), date("2025-03-31"), &mut |_| {
            Err(PersistenceError::QueryFailed(String::from("sink closed")))
        })
        .expect_err("sink error must propagate");
    assert!(matches!(err, PersistenceError::QueryFailed(_)));
}
