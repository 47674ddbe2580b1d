//! Nonce prefix derivation and validation.
//!
//! A prefix tags every nonce with the backend that issued it so that
//! redemption can be routed back to the same backend. Prefixes are routing
//! keys, not secrets.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

use crate::errors::NonceError;

/// Length of a derived prefix.
pub const PREFIX_LEN: usize = 8;

/// Length of hand-configured prefixes used by static prefix maps.
pub const LEGACY_PREFIX_LEN: usize = 4;

/// Derive the prefix for a backend address.
///
/// `base64url(HMAC-SHA256(key, address))` truncated to [`PREFIX_LEN`].
/// Issuer and router must use the same key and the same address string.
pub fn derive_prefix(address: &str, key: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let tag = hmac::sign(&key, address.as_bytes());
    let mut encoded = URL_SAFE_NO_PAD.encode(tag.as_ref());
    encoded.truncate(PREFIX_LEN);
    encoded
}

/// Generate a random prefix of [`PREFIX_LEN`] characters.
pub fn random_prefix(rng: &SystemRandom) -> Result<String, NonceError> {
    // 6 bytes encode to exactly 8 base64 characters.
    let mut raw = [0u8; PREFIX_LEN * 3 / 4];
    rng.fill(&mut raw).map_err(|_| NonceError::Rng)?;
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

/// Check that a configured prefix has an accepted length and decodes as
/// unpadded base64url.
pub fn validate_prefix(prefix: &str) -> Result<(), NonceError> {
    if prefix.len() != PREFIX_LEN && prefix.len() != LEGACY_PREFIX_LEN {
        return Err(NonceError::InvalidPrefix {
            prefix: prefix.to_string(),
            reason: "must be 4 or 8 characters",
        });
    }
    if URL_SAFE_NO_PAD.decode(prefix).is_err() {
        return Err(NonceError::InvalidPrefix {
            prefix: prefix.to_string(),
            reason: "must be unpadded base64url",
        });
    }
    Ok(())
}

/// Split a nonce into `(prefix, remainder)` at `prefix_len`.
///
/// Returns `None` when the nonce is too short or `prefix_len` does not
/// fall on a character boundary.
pub fn split_nonce(nonce: &str, prefix_len: usize) -> Option<(&str, &str)> {
    if nonce.len() < prefix_len || !nonce.is_char_boundary(prefix_len) {
        return None;
    }
    Some(nonce.split_at(prefix_len))
}
