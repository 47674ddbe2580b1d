//! Account key policy.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

use portcullis_config::KeyPolicyConfig;

use crate::jwk::{bit_len, EcCurve, JsonWebKey, PublicKey};

/// RSA modulus sizes accepted for account keys.
const ALLOWED_RSA_BITS: [usize; 3] = [2048, 3072, 4096];

/// Odd primes below 752; a modulus divisible by any of them is broken.
static SMALL_PRIMES: Lazy<Vec<u32>> = Lazy::new(|| {
    (3u32..752)
        .step_by(2)
        .filter(|n| (3..).step_by(2).take_while(|d| d * d <= *n).all(|d| n % d != 0))
        .collect()
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyPolicyError {
    #[error("unsupported key type {0}")]
    UnsupportedKeyType(&'static str),

    #[error("key size not supported: {0}")]
    KeySize(usize),

    #[error("key exponent must be 65537")]
    Exponent,

    #[error("key divisible by small prime")]
    SmallPrime,

    #[error("ECDSA curve {0} not allowed")]
    CurveNotAllowed(&'static str),

    #[error("key point is not on the curve")]
    NotOnCurve,

    #[error("public key is forbidden")]
    Blocked,
}

/// Decides whether a public key may be used as an account key.
pub trait KeyPolicy: Send + Sync {
    fn good_key(&self, key: &JsonWebKey) -> Result<(), KeyPolicyError>;
}

/// Accepts every key. For tests and deployments that enforce policy
/// elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllKeys;

impl KeyPolicy for AcceptAllKeys {
    fn good_key(&self, _key: &JsonWebKey) -> Result<(), KeyPolicyError> {
        Ok(())
    }
}

/// The production key policy.
#[derive(Debug, Clone)]
pub struct GoodKeyPolicy {
    allow_rsa: bool,
    allowed_curves: HashSet<EcCurve>,
    blocked: HashSet<String>,
}

impl GoodKeyPolicy {
    pub fn new(config: &KeyPolicyConfig) -> Self {
        let mut allowed_curves = HashSet::new();
        if config.allow_ecdsa_p256 {
            allowed_curves.insert(EcCurve::P256);
        }
        if config.allow_ecdsa_p384 {
            allowed_curves.insert(EcCurve::P384);
        }
        if config.allow_ecdsa_p521 {
            allowed_curves.insert(EcCurve::P521);
        }

        Self {
            allow_rsa: config.allow_rsa,
            allowed_curves,
            blocked: config.blocked_thumbprints.iter().cloned().collect(),
        }
    }

    fn good_rsa(&self, n: &[u8], e: &[u8]) -> Result<(), KeyPolicyError> {
        if !self.allow_rsa {
            return Err(KeyPolicyError::UnsupportedKeyType("RSA"));
        }

        let bits = bit_len(n);
        if !ALLOWED_RSA_BITS.contains(&bits) {
            return Err(KeyPolicyError::KeySize(bits));
        }
        if e != [0x01, 0x00, 0x01] {
            return Err(KeyPolicyError::Exponent);
        }
        if n.last().is_some_and(|b| b & 1 == 0) {
            return Err(KeyPolicyError::SmallPrime);
        }
        if SMALL_PRIMES.iter().any(|p| rem(n, *p) == 0) {
            return Err(KeyPolicyError::SmallPrime);
        }
        Ok(())
    }

    fn good_ec(&self, key: &PublicKey, curve: EcCurve) -> Result<(), KeyPolicyError> {
        if !self.allowed_curves.contains(&curve) {
            return Err(KeyPolicyError::CurveNotAllowed(curve.name()));
        }
        if !key.is_on_curve() {
            return Err(KeyPolicyError::NotOnCurve);
        }
        Ok(())
    }
}

impl Default for GoodKeyPolicy {
    fn default() -> Self {
        Self::new(&KeyPolicyConfig::default())
    }
}

impl KeyPolicy for GoodKeyPolicy {
    fn good_key(&self, key: &JsonWebKey) -> Result<(), KeyPolicyError> {
        if !self.blocked.is_empty() && self.blocked.contains(&key.thumbprint()) {
            debug!("Rejected blocked account key");
            return Err(KeyPolicyError::Blocked);
        }

        match &key.key {
            PublicKey::Rsa { n, e } => self.good_rsa(n, e),
            PublicKey::Ec { curve, .. } => self.good_ec(&key.key, *curve),
            PublicKey::Okp { .. } => Err(KeyPolicyError::UnsupportedKeyType("OKP")),
        }
    }
}

/// `n mod p` for a big-endian `n`.
fn rem(n: &[u8], p: u32) -> u32 {
    n.iter()
        .fold(0u32, |acc, byte| ((acc << 8) | u32::from(*byte)) % p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn rsa(n: Vec<u8>, e: Vec<u8>) -> JsonWebKey {
        JsonWebKey::new(PublicKey::Rsa { n, e })
    }

    /// A 2048-bit odd modulus with no small factors.
    fn rsa_modulus() -> Vec<u8> {
        let PublicKey::Rsa { n, .. } = testing::rsa_key().jwk().key else {
            unreachable!()
        };
        n
    }

    #[test]
    fn test_small_primes() {
        assert_eq!(SMALL_PRIMES.len(), 132);
        assert_eq!(SMALL_PRIMES.first(), Some(&3));
        assert_eq!(SMALL_PRIMES.last(), Some(&751));
    }

    #[test]
    fn test_accepts_good_keys() {
        let policy = GoodKeyPolicy::default();
        assert_eq!(policy.good_key(&testing::rsa_key().jwk()), Ok(()));
        assert_eq!(policy.good_key(&testing::ec_key(EcCurve::P256).jwk()), Ok(()));
        assert_eq!(policy.good_key(&testing::ec_key(EcCurve::P384).jwk()), Ok(()));
    }

    #[test]
    fn test_rsa_size_and_exponent() {
        let policy = GoodKeyPolicy::default();
        let n = rsa_modulus();

        let short = rsa(n[1..].to_vec(), vec![1, 0, 1]);
        assert_eq!(policy.good_key(&short), Err(KeyPolicyError::KeySize(2040)));

        let e3 = rsa(n.clone(), vec![3]);
        assert_eq!(policy.good_key(&e3), Err(KeyPolicyError::Exponent));

        let mut even = n.clone();
        *even.last_mut().unwrap() &= 0xfe;
        assert_eq!(policy.good_key(&rsa(even, vec![1, 0, 1])), Err(KeyPolicyError::SmallPrime));
    }

    #[test]
    fn test_rsa_divisible_by_three() {
        // 2^2048 - 1: odd, right size, and a multiple of 3.
        let n = vec![0xffu8; 256];
        assert_eq!(rem(&n, 3), 0);

        let policy = GoodKeyPolicy::default();
        assert_eq!(policy.good_key(&rsa(n, vec![1, 0, 1])), Err(KeyPolicyError::SmallPrime));
    }

    #[test]
    fn test_curve_policy() {
        let policy = GoodKeyPolicy::new(&KeyPolicyConfig {
            allow_ecdsa_p384: false,
            ..Default::default()
        });
        assert_eq!(
            policy.good_key(&testing::ec_key(EcCurve::P384).jwk()),
            Err(KeyPolicyError::CurveNotAllowed("P-384"))
        );

        let mut off_curve = testing::ec_key(EcCurve::P256).jwk();
        if let PublicKey::Ec { y, .. } = &mut off_curve.key {
            y[31] ^= 0x01;
        }
        assert_eq!(policy.good_key(&off_curve), Err(KeyPolicyError::NotOnCurve));
    }

    #[test]
    fn test_rsa_disabled() {
        let policy = GoodKeyPolicy::new(&KeyPolicyConfig {
            allow_rsa: false,
            ..Default::default()
        });
        assert_eq!(
            policy.good_key(&testing::rsa_key().jwk()),
            Err(KeyPolicyError::UnsupportedKeyType("RSA"))
        );
    }

    #[test]
    fn test_blocked_thumbprint() {
        let key = testing::ec_key(EcCurve::P256).jwk();
        let policy = GoodKeyPolicy::new(&KeyPolicyConfig {
            blocked_thumbprints: vec![key.thumbprint()],
            ..Default::default()
        });
        assert_eq!(policy.good_key(&key), Err(KeyPolicyError::Blocked));
        assert_eq!(KeyPolicyError::Blocked.to_string(), "public key is forbidden");
        assert!(AcceptAllKeys.good_key(&key).is_ok());
    }

    #[test]
    fn test_rem() {
        assert_eq!(rem(&[0x01, 0x00], 7), 256 % 7);
        assert_eq!(rem(&[], 5), 0);
    }
}
