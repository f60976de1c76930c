// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Error kinds for the API layer.
//!
//! Each variant corresponds to exactly one HTTP status and one wire shape;
//! the mapping itself lives in the gateway. Store errors are translated here
//! and never leak to callers directly.

use paceline_persistence::PersistenceError;

/// API-level errors.
///
/// `AlreadyRegistered` is deliberately a first-class kind rather than an
/// internal failure: a double-tap on a phone is a normal outcome and must
/// return quickly with the current tally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The request body or parameters could not be parsed.
    Malformed {
        /// What was wrong with the request.
        message: String,
    },
    /// The admin credential was missing or wrong.
    Unauthorized,
    /// The caller exceeded the registration rate limit.
    RateLimited,
    /// The session code or token does not resolve to a run.
    BadSession,
    /// The run exists but no longer admits registrations.
    SessionClosed,
    /// The runner is already registered for this run.
    AlreadyRegistered {
        /// The unchanged tally for the run.
        current_count: i64,
    },
    /// A request field failed validation.
    Invalid {
        /// What was invalid.
        message: String,
    },
    /// A transient infrastructure failure; safe to retry.
    Retryable {
        /// The underlying failure.
        message: String,
    },
    /// An unexpected internal error.
    Internal {
        /// A description of the internal error.
        message: String,
    },
}

impl ApiError {
    /// The wire identifier for this error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "Malformed",
            Self::Unauthorized => "Unauthorized",
            Self::RateLimited => "RateLimited",
            Self::BadSession => "BadSession",
            Self::SessionClosed => "SessionClosed",
            Self::AlreadyRegistered { .. } => "AlreadyRegistered",
            Self::Invalid { .. } => "Invalid",
            Self::Retryable { .. } => "Retryable",
            Self::Internal { .. } => "Internal",
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed { message } => write!(f, "Malformed request: {message}"),
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::RateLimited => write!(f, "Too many requests"),
            Self::BadSession => write!(f, "Invalid session ID or run not active"),
            Self::SessionClosed => write!(f, "This run is no longer accepting registrations"),
            Self::AlreadyRegistered { .. } => {
                write!(f, "You have already registered for this run")
            }
            Self::Invalid { message } => write!(f, "Invalid input: {message}"),
            Self::Retryable { message } => write!(f, "Temporary failure, please retry: {message}"),
            Self::Internal { message } => write!(f, "Internal error: {message}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<PersistenceError> for ApiError {
    fn from(err: PersistenceError) -> Self {
        if err.is_retryable() {
            Self::Retryable {
                message: err.to_string(),
            }
        } else {
            Self::Internal {
                message: err.to_string(),
            }
        }
    }
}
