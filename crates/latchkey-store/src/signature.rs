//! Token signatures.
//!
//! The store is keyed by a signature derived from the token, never by the
//! token itself. A leaked table therefore does not leak usable tokens.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Derives the storage signature of `token` (SHA-256, lowercase hex).
#[must_use]
pub fn derive_signature(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generates a 256-bit random token, base64url encoded without padding.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
