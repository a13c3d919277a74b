//! Request signing primitives shared by the gateway and the client SDK.
//!
//! The canonical string ties the signed subset of a request together:
//!
//! ```text
//! UPPERCASE(method) \n path \n content_sha256 \n timestamp \n nonce
//! ```
//!
//! The path is the incoming request path without the query string. Absent
//! fields are substituted with the empty string so both sides always hash
//! the same five lines.

use ring::hmac;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Builds the canonical signing string.
///
/// Deterministic on input case for the method: `canonical("post", ..)` and
/// `canonical("POST", ..)` produce the same output.
#[must_use]
pub fn canonical(
    method: &str,
    path: &str,
    content_sha256: &str,
    timestamp: &str,
    nonce: &str,
) -> String {
    format!("{}\n{path}\n{content_sha256}\n{timestamp}\n{nonce}", method.to_uppercase())
}

/// Hex-encoded SHA-256 digest of `data` (64 lowercase hex characters).
///
/// Used for the request-body digest carried in `x-content-sha256`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// HMAC-SHA256 of `data` under `key`, hex-encoded (64 lowercase hex chars).
#[must_use]
pub fn hmac_sha256_hex(data: &str, key: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key.as_bytes());
    let tag = hmac::sign(&key, data.as_bytes());
    hex::encode(tag.as_ref())
}

/// Constant-time comparison of a provided signature against the expected one.
///
/// Length mismatches return `false` without leaking where the inputs differ.
#[must_use]
pub fn verify(provided_hex: &str, expected_hex: &str) -> bool {
    let provided = provided_hex.as_bytes();
    let expected = expected_hex.as_bytes();
    if provided.len() != expected.len() {
        return false;
    }
    provided.ct_eq(expected).into()
}
