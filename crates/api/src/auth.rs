// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Admin credential gate.
//!
//! Admin endpoints are protected by a single shared secret; there are no
//! per-user accounts. Comparison happens over fixed-length digests in
//! constant time, so neither the secret's length nor a matching prefix
//! leaks through timing.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// The shared admin secret, held as a SHA-256 digest.
///
/// Loaded once at startup; the plaintext secret is not retained.
pub struct AdminSecret {
    digest: [u8; 32],
}

impl AdminSecret {
    /// Creates the gate from the configured secret.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            digest: Sha256::digest(secret.as_bytes()).into(),
        }
    }

    /// Verifies a presented credential in constant time.
    #[must_use]
    pub fn verify(&self, presented: &str) -> bool {
        let presented_digest: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        self.digest.ct_eq(&presented_digest).into()
    }
}
