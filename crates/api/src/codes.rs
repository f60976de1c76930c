// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Session code issuance and signed QR token handling.
//!
//! Codes are short, human-typable strings drawn from an alphabet with the
//! visually ambiguous characters (`0`, `O`, `1`, `I`, `L`) removed. QR tokens
//! are an HMAC-SHA256 signed encoding of `(session_code, expires_at)`; they
//! are never persisted.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use paceline_domain::SessionCode;
use paceline_persistence::Persistence;
use rand::Rng;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::error::ApiError;

/// Default code alphabet: digits and uppercase letters, ambiguous glyphs
/// removed. 31 symbols at length 5 gives ~28.6 million codes.
pub const DEFAULT_SESSION_CODE_ALPHABET: &str = "23456789ABCDEFGHJKMNPQRSTUVWXYZ";

/// Default code length. Short enough to read aloud and type on a phone.
pub const DEFAULT_SESSION_CODE_LEN: usize = 5;

/// How many random draws to attempt before concluding the code space is too
/// crowded for the configured alphabet and length.
const MAX_CODE_ATTEMPTS: usize = 32;

/// Version/type marker baked into every QR token. A token minted for any
/// other purpose or format can never validate as a QR token.
const TOKEN_PREFIX: &str = "qr1";

type HmacSha256 = Hmac<Sha256>;

/// Why a presented QR token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// The token's signature verified but its expiry has elapsed.
    Expired,
    /// The token is malformed or its signature does not verify.
    Invalid,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expired => write!(f, "Token has expired"),
            Self::Invalid => write!(f, "Token is invalid"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Issues session codes and mints/verifies signed QR tokens.
///
/// The signing key is loaded once at startup and held read-only for the
/// lifetime of the process.
#[derive(Debug)]
pub struct CodeIssuer {
    alphabet: Vec<char>,
    code_len: usize,
    mac: HmacSha256,
    ttl: Duration,
}

impl CodeIssuer {
    /// Creates an issuer from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the signing key is empty, the alphabet is empty
    /// or contains non-alphanumeric characters, or the code length is
    /// outside `1..=16`.
    pub fn new(
        signing_key: &str,
        alphabet: &str,
        code_len: usize,
        ttl: Duration,
    ) -> Result<Self, ApiError> {
        if signing_key.is_empty() {
            return Err(ApiError::Internal {
                message: String::from("signing key must not be empty"),
            });
        }
        let alphabet: Vec<char> = alphabet.chars().collect();
        if alphabet.is_empty() || !alphabet.iter().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ApiError::Internal {
                message: String::from("session code alphabet must be non-empty ASCII alphanumeric"),
            });
        }
        if code_len == 0 || code_len > 16 {
            return Err(ApiError::Internal {
                message: String::from("session code length must be between 1 and 16"),
            });
        }
        let mac: HmacSha256 =
            HmacSha256::new_from_slice(signing_key.as_bytes()).map_err(|e| ApiError::Internal {
                message: format!("failed to initialise signing key: {e}"),
            })?;
        Ok(Self {
            alphabet,
            code_len,
            mac,
            ttl,
        })
    }

    /// Issues a previously unused session code.
    ///
    /// Candidates are drawn at random and probed against the store; the
    /// `UNIQUE` constraint on `runs.session_code` remains the backstop for
    /// concurrent issuers.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried or no unused code is
    /// found within the attempt bound.
    pub fn new_session_code(&self, store: &Persistence) -> Result<SessionCode, ApiError> {
        for attempt in 0..MAX_CODE_ATTEMPTS {
            let candidate: SessionCode = self.random_code();
            if store.session_code_exists(&candidate)? {
                debug!(attempt, code = %candidate, "Session code collision, retrying");
                continue;
            }
            return Ok(candidate);
        }
        warn!(
            attempts = MAX_CODE_ATTEMPTS,
            "Exhausted session code attempts"
        );
        Err(ApiError::Internal {
            message: String::from(
                "could not find an unused session code; widen the alphabet or length",
            ),
        })
    }

    fn random_code(&self) -> SessionCode {
        let mut rng = rand::thread_rng();
        let code: String = (0..self.code_len)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())])
            .collect();
        SessionCode::from_trusted(code)
    }

    /// Mints a signed QR token for a session code, expiring after the
    /// configured TTL.
    #[must_use]
    pub fn mint_qr_token(&self, code: &SessionCode) -> String {
        let expires_at: i64 = (Utc::now() + self.ttl).timestamp();
        self.mint_with_expiry(code, expires_at)
    }

    /// Mints a token with an explicit expiry timestamp (seconds since epoch).
    pub(crate) fn mint_with_expiry(&self, code: &SessionCode, expires_at: i64) -> String {
        let payload: String = format!(
            "{TOKEN_PREFIX}.{}.{expires_at}",
            URL_SAFE_NO_PAD.encode(code.value())
        );
        let signature: Vec<u8> = self.sign(&payload);
        format!("{payload}.{}", URL_SAFE_NO_PAD.encode(signature))
    }

    /// Verifies a presented QR token and recovers its session code.
    ///
    /// The signature is checked before the expiry so a tampered expiry can
    /// never turn `Invalid` into `Expired`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Invalid`] for malformed or tampered tokens and
    /// [`TokenError::Expired`] for genuine tokens past their expiry.
    pub fn verify_qr_token(&self, token: &str) -> Result<SessionCode, TokenError> {
        self.verify_qr_token_at(token, Utc::now())
    }

    pub(crate) fn verify_qr_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionCode, TokenError> {
        let parts: Vec<&str> = token.split('.').collect();
        let &[prefix, code_b64, expires_s, signature_b64] = parts.as_slice() else {
            return Err(TokenError::Invalid);
        };
        if prefix != TOKEN_PREFIX {
            return Err(TokenError::Invalid);
        }

        let payload: String = format!("{prefix}.{code_b64}.{expires_s}");
        let signature: Vec<u8> = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::Invalid)?;

        let mut mac: HmacSha256 = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).map_err(|_| TokenError::Invalid)?;

        let expires_at: i64 = expires_s.parse().map_err(|_| TokenError::Invalid)?;
        if now.timestamp() >= expires_at {
            return Err(TokenError::Expired);
        }

        let code_bytes: Vec<u8> = URL_SAFE_NO_PAD
            .decode(code_b64)
            .map_err(|_| TokenError::Invalid)?;
        let code: String = String::from_utf8(code_bytes).map_err(|_| TokenError::Invalid)?;
        code.parse().map_err(|_| TokenError::Invalid)
    }

    fn sign(&self, payload: &str) -> Vec<u8> {
        let mut mac: HmacSha256 = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}
