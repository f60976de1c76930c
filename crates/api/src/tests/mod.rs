// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

mod calendar_tests;

use crate::codes::{CodeIssuer, DEFAULT_SESSION_CODE_ALPHABET, DEFAULT_SESSION_CODE_LEN};
use chrono::Duration;
use paceline_persistence::Persistence;

pub fn test_store() -> Persistence {
    Persistence::new_in_memory().expect("in-memory store")
}

pub fn test_issuer() -> CodeIssuer {
    CodeIssuer::new(
        "test-signing-key",
        DEFAULT_SESSION_CODE_ALPHABET,
        DEFAULT_SESSION_CODE_LEN,
        Duration::hours(24),
    )
    .expect("issuer")
}
