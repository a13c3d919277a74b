//! AES-256-GCM envelope encryption for secrets at rest.
//!
//! The platform stores consumer secret keys and interface auth configs in an
//! envelope format the gateway decrypts on demand:
//!
//! ```text
//! base64( iv[12] ‖ ciphertext ‖ tag[16] )
//! ```
//!
//! AAD binds a payload to its context (for interface auth configs:
//! `provider_url|platform_path|method`), so a config copied onto another
//! interface row fails authentication instead of decrypting.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

/// GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CryptoError {
    /// The master key is not exactly 32 bytes (AES-256).
    #[error("master key must be 32 bytes")]
    InvalidKey,

    /// The payload is not base64, or too short to hold iv + ciphertext + tag.
    #[error("encrypted payload is malformed")]
    InvalidPayload,

    /// Authentication failed: wrong key, wrong AAD, or tampered data.
    #[error("decryption failed")]
    DecryptFailed,

    #[error("encryption failed")]
    EncryptFailed,
}

/// Heuristic test for the envelope format: valid base64 whose decoded length
/// can hold an IV, at least one ciphertext byte, and the tag. Plaintext
/// values (non-base64, or too short) test negative.
#[must_use]
pub fn is_encrypted(data: &str) -> bool {
    if data.is_empty() {
        return false;
    }
    match BASE64.decode(data) {
        Ok(decoded) => decoded.len() >= NONCE_LEN + 1 + TAG_LEN,
        Err(_) => false,
    }
}

/// Encrypts `plaintext` under the 32-byte `key`, binding `aad`.
///
/// Used by provisioning tooling and tests; the gateway itself only decrypts.
///
/// # Errors
///
/// [`CryptoError::InvalidKey`] for a wrong-sized key,
/// [`CryptoError::EncryptFailed`] if the RNG or cipher fails.
pub fn aes_gcm_encrypt(key: &[u8], aad: &[u8], plaintext: &str) -> Result<String, CryptoError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key).map_err(|_| CryptoError::InvalidKey)?;
    let sealing = LessSafeKey::new(unbound);

    let mut iv = [0u8; NONCE_LEN];
    SystemRandom::new().fill(&mut iv).map_err(|_| CryptoError::EncryptFailed)?;
    let nonce = Nonce::assume_unique_for_key(iv);

    let mut in_out = plaintext.as_bytes().to_vec();
    sealing
        .seal_in_place_append_tag(nonce, Aad::from(aad), &mut in_out)
        .map_err(|_| CryptoError::EncryptFailed)?;

    let mut payload = Vec::with_capacity(NONCE_LEN + in_out.len());
    payload.extend_from_slice(&iv);
    payload.extend_from_slice(&in_out);
    Ok(BASE64.encode(payload))
}

/// Decrypts an envelope produced by [`aes_gcm_encrypt`] (or the platform's
/// equivalent), verifying the authentication tag and `aad`.
///
/// # Errors
///
/// [`CryptoError::InvalidKey`] for a wrong-sized key,
/// [`CryptoError::InvalidPayload`] for malformed input,
/// [`CryptoError::DecryptFailed`] when authentication fails.
pub fn aes_gcm_decrypt(key: &[u8], aad: &[u8], payload_b64: &str) -> Result<String, CryptoError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key).map_err(|_| CryptoError::InvalidKey)?;
    let opening = LessSafeKey::new(unbound);

    let payload = BASE64.decode(payload_b64).map_err(|_| CryptoError::InvalidPayload)?;
    if payload.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::InvalidPayload);
    }

    let (iv, ciphertext) = payload.split_at(NONCE_LEN);
    let nonce =
        Nonce::try_assume_unique_for_key(iv).map_err(|_| CryptoError::InvalidPayload)?;

    let mut in_out = ciphertext.to_vec();
    let plaintext = opening
        .open_in_place(nonce, Aad::from(aad), &mut in_out)
        .map_err(|_| CryptoError::DecryptFailed)?;

    String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::DecryptFailed)
}
