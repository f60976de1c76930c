// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

/// Errors that can occur during domain validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The session code is empty, too long, or contains non-alphanumeric
    /// characters.
    InvalidSessionCode(String),
    /// The runner identifier is empty after trimming.
    EmptyRunnerId,
    /// The runner identifier exceeds the configured maximum length.
    RunnerIdTooLong {
        /// Length of the rejected identifier, in characters.
        length: usize,
        /// The configured maximum.
        max: usize,
    },
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSessionCode(msg) => write!(f, "Invalid session code: {msg}"),
            Self::EmptyRunnerId => write!(f, "Runner identifier cannot be empty"),
            Self::RunnerIdTooLong { length, max } => {
                write!(
                    f,
                    "Runner identifier is {length} characters long; maximum is {max}"
                )
            }
        }
    }
}

impl std::error::Error for DomainError {}
