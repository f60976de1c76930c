// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! The registration hot path.
//!
//! At-most-once per `(run, runner)` is delegated entirely to the store's
//! uniqueness constraint; this engine only resolves, validates, and
//! translates outcomes. Publishing the tally update is the gateway's job and
//! happens strictly after the store has committed.

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use paceline_domain::{Run, RunnerId, SessionCode};
use paceline_persistence::{Persistence, RegisterResult};
use tracing::{debug, info};

use crate::codes::CodeIssuer;
use crate::error::ApiError;

/// A successful registration, ready for the gateway to serialise and
/// broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
    /// The run registered against.
    pub run_id: i64,
    /// The run's session code.
    pub session_code: SessionCode,
    /// The normalised runner identifier.
    pub runner: RunnerId,
    /// The post-commit tally.
    pub count: i64,
    /// Human-facing confirmation message.
    pub message: String,
}

/// Admits registrations for `(session, runner)` pairs.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationEngine {
    tz: Tz,
    max_runner_id_len: usize,
}

impl RegistrationEngine {
    /// Creates an engine for the configured time zone and runner-id bound.
    #[must_use]
    pub const fn new(tz: Tz, max_runner_id_len: usize) -> Self {
        Self {
            tz,
            max_runner_id_len,
        }
    }

    /// Registers a runner against a session code or signed QR token.
    ///
    /// Validation happens before any store write: the runner id is
    /// normalised first, then the input is resolved to a run, which must be
    /// active and scheduled for today in the configured time zone. The same
    /// code must not admit late check-ins days after the fact.
    ///
    /// # Errors
    ///
    /// - `Invalid` for an empty or over-length runner id
    /// - `BadSession` for unknown codes and unverifiable or expired tokens
    /// - `SessionClosed` for inactive runs and runs not scheduled today
    /// - `AlreadyRegistered` (with the unchanged tally) for duplicates
    /// - `Retryable` for transient store failures
    pub fn register(
        &self,
        store: &Persistence,
        issuer: &CodeIssuer,
        code_or_token: &str,
        runner_raw: &str,
    ) -> Result<Registered, ApiError> {
        let runner: RunnerId =
            RunnerId::parse(runner_raw, self.max_runner_id_len).map_err(|e| ApiError::Invalid {
                message: e.to_string(),
            })?;

        let code: SessionCode = resolve_session_code(issuer, code_or_token)?;

        let run: Run = store.run_by_code(&code)?.ok_or(ApiError::BadSession)?;
        if !run.is_active {
            return Err(ApiError::SessionClosed);
        }

        let today: NaiveDate = Utc::now().with_timezone(&self.tz).date_naive();
        if run.date != today {
            debug!(run_id = run.id, run_date = %run.date, %today, "Stale session code presented");
            return Err(ApiError::SessionClosed);
        }

        match store.register(run.id, runner.value(), Utc::now().naive_utc())? {
            RegisterResult::Registered(count) => {
                info!(run_id = run.id, runner = %runner, count, "Registration admitted");
                Ok(Registered {
                    run_id: run.id,
                    session_code: run.session_code,
                    message: format!("Registration successful! Welcome to the run, {runner}"),
                    runner,
                    count,
                })
            }
            RegisterResult::Duplicate(count) => Err(ApiError::AlreadyRegistered {
                current_count: count,
            }),
            // The run vanished or flipped between the lookup and the
            // transaction; report what the transaction saw.
            RegisterResult::NoSuchRun => Err(ApiError::BadSession),
            RegisterResult::Inactive => Err(ApiError::SessionClosed),
        }
    }

}

/// Resolves user input to a session code.
///
/// Signed tokens contain `.` separators, which the code alphabet never does,
/// so the two forms cannot be confused.
fn resolve_session_code(issuer: &CodeIssuer, code_or_token: &str) -> Result<SessionCode, ApiError> {
    if code_or_token.contains('.') {
        issuer
            .verify_qr_token(code_or_token)
            .map_err(|_| ApiError::BadSession)
    } else {
        code_or_token.parse().map_err(|_| ApiError::BadSession)
    }
}
