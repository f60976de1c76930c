// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use crate::error::DomainError;

/// Default upper bound on runner identifier length, in characters.
///
/// Long enough for a full name, short enough to keep abuse and accidental
/// paste-errors out of the store.
pub const DEFAULT_MAX_RUNNER_ID_LEN: usize = 64;

/// Trims and validates a raw runner identifier.
///
/// The identifier is opaque: any non-empty trimmed string up to `max_len`
/// characters is accepted. Length is measured in characters, not bytes, so
/// multi-byte names are not penalised.
///
/// Callers outside the crate go through [`RunnerId::parse`], which wraps
/// the normalised value.
///
/// [`RunnerId::parse`]: crate::RunnerId::parse
pub(crate) fn normalize_runner_id(raw: &str, max_len: usize) -> Result<String, DomainError> {
    let trimmed: &str = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::EmptyRunnerId);
    }
    let length: usize = trimmed.chars().count();
    if length > max_len {
        return Err(DomainError::RunnerIdTooLong {
            length,
            max: max_len,
        });
    }
    Ok(trimmed.to_string())
}
