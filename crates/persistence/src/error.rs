// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use diesel::result::DatabaseErrorKind;

/// Errors that can occur during persistence operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// The database connection could not be established.
    ConnectionFailed(String),
    /// Schema migrations failed to apply.
    MigrationFailed(String),
    /// No pooled connection became available within the checkout bound.
    ///
    /// Transient: callers may retry.
    PoolExhausted(String),
    /// The database was busy or locked past the busy timeout.
    ///
    /// Transient: callers may retry.
    Busy(String),
    /// A uniqueness constraint rejected a write.
    ///
    /// Surfaces only from paths where the caller supplies a candidate value
    /// (session codes); duplicate attendances are reported through
    /// [`RegisterResult::Duplicate`](crate::RegisterResult::Duplicate) instead.
    UniqueViolation(String),
    /// A query failed for a non-transient reason.
    QueryFailed(String),
    /// A stored value could not be decoded into its domain type.
    CorruptRow(String),
}

impl PersistenceError {
    /// Whether the operation is safe and sensible to retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted(_) | Self::Busy(_))
    }
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed(msg) => write!(f, "Database connection failed: {msg}"),
            Self::MigrationFailed(msg) => write!(f, "Migration failed: {msg}"),
            Self::PoolExhausted(msg) => write!(f, "Connection pool exhausted: {msg}"),
            Self::Busy(msg) => write!(f, "Database busy: {msg}"),
            Self::UniqueViolation(msg) => write!(f, "Uniqueness constraint violated: {msg}"),
            Self::QueryFailed(msg) => write!(f, "Query failed: {msg}"),
            Self::CorruptRow(msg) => write!(f, "Corrupt row: {msg}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<diesel::result::Error> for PersistenceError {
    fn from(err: diesel::result::Error) -> Self {
        match &err {
            diesel::result::Error::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => {
                    Self::UniqueViolation(info.message().to_string())
                }
                _ if info.message().contains("database is locked") => {
                    Self::Busy(info.message().to_string())
                }
                _ => Self::QueryFailed(info.message().to_string()),
            },
            _ => Self::QueryFailed(err.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for PersistenceError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        Self::PoolExhausted(err.to_string())
    }
}
