// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use crate::error::DomainError;
use crate::validation::normalize_runner_id;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Upper bound on the length of a session code accepted at the boundary.
///
/// Issued codes are five characters by default, but the length is
/// configurable, so parsing only enforces a sane ceiling.
const MAX_SESSION_CODE_LEN: usize = 16;

/// A short, human-typable code identifying a single [`Run`].
///
/// Codes are issued from a restricted uppercase alphabet; parsing folds
/// user input to uppercase so a code read aloud can be typed in either case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCode(String);

impl SessionCode {
    /// Wraps an already-issued code without re-validation.
    ///
    /// Used by the persistence layer when reading codes back out of the
    /// store, where the value was validated at issue time.
    #[must_use]
    pub const fn from_trusted(code: String) -> Self {
        Self(code)
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed: &str = s.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidSessionCode(String::from(
                "code cannot be empty",
            )));
        }
        if trimmed.len() > MAX_SESSION_CODE_LEN {
            return Err(DomainError::InvalidSessionCode(format!(
                "code cannot be longer than {MAX_SESSION_CODE_LEN} characters"
            )));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::InvalidSessionCode(String::from(
                "code must be ASCII alphanumeric",
            )));
        }
        Ok(Self(trimmed.to_uppercase()))
    }
}

impl std::fmt::Display for SessionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque, self-asserted runner identifier.
///
/// The service attaches no identity semantics to the value beyond trimming
/// and a length bound; a student number and a free-form name are equally
/// acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunnerId(String);

impl RunnerId {
    /// Normalizes and validates a raw runner identifier.
    ///
    /// Leading and trailing whitespace is trimmed. The result must be
    /// non-empty and at most `max_len` characters.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::EmptyRunnerId`] or
    /// [`DomainError::RunnerIdTooLong`].
    pub fn parse(raw: &str, max_len: usize) -> Result<Self, DomainError> {
        normalize_runner_id(raw, max_len).map(Self)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A scheduled attendance-taking session on a specific date.
///
/// Runs are created when a calendar day is first marked as a run day and are
/// never deleted; marking the day off again only clears `is_active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// Monotonic identifier assigned by the store.
    pub id: i64,
    /// The calendar day, in the service's configured time zone.
    pub date: NaiveDate,
    /// The globally unique session code for this run.
    pub session_code: SessionCode,
    /// Whether the run still admits registrations.
    pub is_active: bool,
}

/// A single successful check-in by one runner for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendance {
    /// Identifier assigned by the store.
    pub id: i64,
    /// The run this attendance belongs to.
    pub run_id: i64,
    /// The self-asserted runner identifier.
    pub runner_id: RunnerId,
    /// Server-side registration timestamp (UTC).
    pub registered_at: NaiveDateTime,
}

/// An administrator-controlled calendar entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDay {
    /// The calendar day.
    pub date: NaiveDate,
    /// Whether the day is marked as a run day.
    pub has_run: bool,
}
