//! JSON Web Keys.
//!
//! Only public keys are represented. RSA moduli and exponents are kept as
//! big-endian bytes without leading zeros, so two encodings of the same key
//! compare equal and produce the same RFC 7638 thumbprint.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::signature::{RsaPublicKeyComponents, RSA_PKCS1_2048_8192_SHA256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Errors from decoding a JWK.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwkError {
    #[error("unknown json web key type {0:?}")]
    UnknownKeyType(String),

    #[error("unsupported elliptic curve {0:?}")]
    UnknownCurve(String),

    #[error("missing {0} parameter")]
    MissingParameter(&'static str),

    #[error("invalid base64url in {0} parameter")]
    InvalidEncoding(&'static str),

    #[error("invalid EC public key, wrong length for {0}")]
    WrongCoordinateLength(&'static str),

    #[error("embedded key must be a public key")]
    PrivateKey,
}

/// Errors from verifying a signature with a JWK.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    #[error("algorithm {0} cannot be used with this key")]
    AlgorithmMismatch(SignatureAlgorithm),

    #[error("invalid public key")]
    InvalidKey,

    #[error("malformed signature")]
    Malformed,

    #[error("signature does not verify")]
    Invalid,
}

macro_rules! ecdsa_verify {
    ($curve:ident, $point:expr, $message:expr, $signature:expr) => {{
        use $curve::ecdsa::signature::Verifier;
        let key = $curve::ecdsa::VerifyingKey::from_sec1_bytes($point)
            .map_err(|_| SignatureError::InvalidKey)?;
        let signature = $curve::ecdsa::Signature::from_slice($signature)
            .map_err(|_| SignatureError::Malformed)?;
        key.verify($message, &signature)
            .map_err(|_| SignatureError::Invalid)
    }};
}

// ============================================================================
// Algorithms and curves
// ============================================================================

/// JWS signature algorithms accepted on ACME requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    RS256,
    ES256,
    ES384,
    ES512,
}

impl SignatureAlgorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "RS256" => Some(SignatureAlgorithm::RS256),
            "ES256" => Some(SignatureAlgorithm::ES256),
            "ES384" => Some(SignatureAlgorithm::ES384),
            "ES512" => Some(SignatureAlgorithm::ES512),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::RS256 => "RS256",
            SignatureAlgorithm::ES256 => "ES256",
            SignatureAlgorithm::ES384 => "ES384",
            SignatureAlgorithm::ES512 => "ES512",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// NIST curves usable for ECDSA account keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcCurve {
    P256,
    P384,
    P521,
}

impl EcCurve {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "P-256" => Some(EcCurve::P256),
            "P-384" => Some(EcCurve::P384),
            "P-521" => Some(EcCurve::P521),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EcCurve::P256 => "P-256",
            EcCurve::P384 => "P-384",
            EcCurve::P521 => "P-521",
        }
    }

    /// Byte length of one affine coordinate.
    pub fn coordinate_len(&self) -> usize {
        match self {
            EcCurve::P256 => 32,
            EcCurve::P384 => 48,
            EcCurve::P521 => 66,
        }
    }

    /// The only algorithm a key on this curve may sign with.
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        match self {
            EcCurve::P256 => SignatureAlgorithm::ES256,
            EcCurve::P384 => SignatureAlgorithm::ES384,
            EcCurve::P521 => SignatureAlgorithm::ES512,
        }
    }
}

// ============================================================================
// Keys
// ============================================================================

/// Public key material of a JWK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { curve: EcCurve, x: Vec<u8>, y: Vec<u8> },
    /// Octet key pair (EdDSA). Parsed so it can be rejected with a precise
    /// error; never accepted for signing.
    Okp { curve: String, x: Vec<u8> },
}

impl PublicKey {
    pub fn key_type(&self) -> &'static str {
        match self {
            PublicKey::Rsa { .. } => "RSA",
            PublicKey::Ec { .. } => "EC",
            PublicKey::Okp { .. } => "OKP",
        }
    }

    /// The algorithm this key must sign with, if it can sign ACME requests.
    pub fn signature_algorithm(&self) -> Option<SignatureAlgorithm> {
        match self {
            PublicKey::Rsa { .. } => Some(SignatureAlgorithm::RS256),
            PublicKey::Ec { curve, .. } => Some(curve.signature_algorithm()),
            PublicKey::Okp { .. } => None,
        }
    }

    /// Bit length of an RSA modulus.
    pub fn rsa_modulus_bits(&self) -> Option<usize> {
        match self {
            PublicKey::Rsa { n, .. } => Some(bit_len(n)),
            _ => None,
        }
    }

    /// Whether an EC key's point lies on its curve. Non-EC keys return false.
    pub fn is_on_curve(&self) -> bool {
        let PublicKey::Ec { curve, x, y } = self else {
            return false;
        };
        let point = sec1_point(x, y);
        match curve {
            EcCurve::P256 => p256::PublicKey::from_sec1_bytes(&point).is_ok(),
            EcCurve::P384 => p384::PublicKey::from_sec1_bytes(&point).is_ok(),
            EcCurve::P521 => p521::PublicKey::from_sec1_bytes(&point).is_ok(),
        }
    }
}

/// A public JSON Web Key with its optional `kid` and `alg` members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawJwk", into = "RawJwk")]
pub struct JsonWebKey {
    pub key: PublicKey,
    pub key_id: Option<String>,
    pub algorithm: Option<String>,
}

impl JsonWebKey {
    pub fn new(key: PublicKey) -> Self {
        Self {
            key,
            key_id: None,
            algorithm: None,
        }
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = Some(algorithm.into());
        self
    }

    /// Structural validity: non-zero RSA parameters, EC points on the
    /// curve, 32-byte Ed25519 keys.
    pub fn valid(&self) -> bool {
        match &self.key {
            PublicKey::Rsa { n, e } => !n.is_empty() && !e.is_empty(),
            PublicKey::Ec { .. } => self.key.is_on_curve(),
            PublicKey::Okp { curve, x } => curve == "Ed25519" && x.len() == 32,
        }
    }

    /// RFC 7638 SHA-256 thumbprint, base64url encoded.
    pub fn thumbprint(&self) -> String {
        let members = match &self.key {
            PublicKey::Rsa { n, e } => serde_json::to_string(&RsaMembers {
                e: &encode(e),
                kty: "RSA",
                n: &encode(n),
            }),
            PublicKey::Ec { curve, x, y } => serde_json::to_string(&EcMembers {
                crv: curve.name(),
                kty: "EC",
                x: &encode(x),
                y: &encode(y),
            }),
            PublicKey::Okp { curve, x } => serde_json::to_string(&OkpMembers {
                crv: curve,
                kty: "OKP",
                x: &encode(x),
            }),
        }
        .unwrap_or_default();

        URL_SAFE_NO_PAD.encode(Sha256::digest(members.as_bytes()))
    }

    /// Verify `signature` over `message` with `algorithm`.
    ///
    /// ECDSA signatures use the fixed-width `r || s` form of RFC 7518.
    pub fn verify(
        &self,
        algorithm: SignatureAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), SignatureError> {
        match (&self.key, algorithm) {
            (PublicKey::Rsa { n, e }, SignatureAlgorithm::RS256) => {
                let public = RsaPublicKeyComponents {
                    n: n.as_slice(),
                    e: e.as_slice(),
                };
                public
                    .verify(&RSA_PKCS1_2048_8192_SHA256, message, signature)
                    .map_err(|_| SignatureError::Invalid)
            }
            (PublicKey::Ec { curve, x, y }, algorithm)
                if curve.signature_algorithm() == algorithm =>
            {
                let point = sec1_point(x, y);
                match curve {
                    EcCurve::P256 => ecdsa_verify!(p256, &point, message, signature),
                    EcCurve::P384 => ecdsa_verify!(p384, &point, message, signature),
                    EcCurve::P521 => ecdsa_verify!(p521, &point, message, signature),
                }
            }
            (_, algorithm) => Err(SignatureError::AlgorithmMismatch(algorithm)),
        }
    }
}

/// Whether two keys carry the same public key material. `kid` and `alg`
/// are ignored.
pub fn public_keys_equal(a: &JsonWebKey, b: &JsonWebKey) -> bool {
    a.key == b.key
}

fn sec1_point(x: &[u8], y: &[u8]) -> Vec<u8> {
    let mut point = Vec::with_capacity(1 + x.len() + y.len());
    point.push(0x04);
    point.extend_from_slice(x);
    point.extend_from_slice(y);
    point
}

pub(crate) fn bit_len(bytes: &[u8]) -> usize {
    match bytes.first() {
        Some(first) => (bytes.len() - 1) * 8 + (8 - first.leading_zeros() as usize),
        None => 0,
    }
}

fn strip_leading_zeros(mut bytes: Vec<u8>) -> Vec<u8> {
    let zeros = bytes.iter().take_while(|b| **b == 0).count();
    bytes.drain(..zeros);
    bytes
}

fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn decode(field: &'static str, value: Option<String>) -> Result<Vec<u8>, JwkError> {
    let value = value.ok_or(JwkError::MissingParameter(field))?;
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|_| JwkError::InvalidEncoding(field))
}

// ============================================================================
// Wire form
// ============================================================================

#[derive(Serialize)]
struct RsaMembers<'a> {
    e: &'a str,
    kty: &'a str,
    n: &'a str,
}

#[derive(Serialize)]
struct EcMembers<'a> {
    crv: &'a str,
    kty: &'a str,
    x: &'a str,
    y: &'a str,
}

#[derive(Serialize)]
struct OkpMembers<'a> {
    crv: &'a str,
    kty: &'a str,
    x: &'a str,
}

#[derive(Serialize, Deserialize)]
struct RawJwk {
    kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    y: Option<String>,
    #[serde(default, skip_serializing)]
    d: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alg: Option<String>,
}

impl TryFrom<RawJwk> for JsonWebKey {
    type Error = JwkError;

    fn try_from(raw: RawJwk) -> Result<Self, Self::Error> {
        if raw.d.is_some() {
            return Err(JwkError::PrivateKey);
        }

        let key = match raw.kty.as_str() {
            "RSA" => PublicKey::Rsa {
                n: strip_leading_zeros(decode("n", raw.n)?),
                e: strip_leading_zeros(decode("e", raw.e)?),
            },
            "EC" => {
                let crv = raw.crv.ok_or(JwkError::MissingParameter("crv"))?;
                let curve = EcCurve::from_name(&crv).ok_or(JwkError::UnknownCurve(crv))?;
                let x = decode("x", raw.x)?;
                let y = decode("y", raw.y)?;
                if x.len() != curve.coordinate_len() {
                    return Err(JwkError::WrongCoordinateLength("x"));
                }
                if y.len() != curve.coordinate_len() {
                    return Err(JwkError::WrongCoordinateLength("y"));
                }
                PublicKey::Ec { curve, x, y }
            }
            "OKP" => PublicKey::Okp {
                curve: raw.crv.ok_or(JwkError::MissingParameter("crv"))?,
                x: decode("x", raw.x)?,
            },
            other => return Err(JwkError::UnknownKeyType(other.to_string())),
        };

        Ok(JsonWebKey {
            key,
            key_id: raw.kid,
            algorithm: raw.alg,
        })
    }
}

impl From<JsonWebKey> for RawJwk {
    fn from(jwk: JsonWebKey) -> Self {
        let mut raw = RawJwk {
            kty: jwk.key.key_type().to_string(),
            crv: None,
            n: None,
            e: None,
            x: None,
            y: None,
            d: None,
            kid: jwk.key_id,
            alg: jwk.algorithm,
        };
        match jwk.key {
            PublicKey::Rsa { n, e } => {
                raw.n = Some(encode(&n));
                raw.e = Some(encode(&e));
            }
            PublicKey::Ec { curve, x, y } => {
                raw.crv = Some(curve.name().to_string());
                raw.x = Some(encode(&x));
                raw.y = Some(encode(&y));
            }
            PublicKey::Okp { curve, x } => {
                raw.crv = Some(curve);
                raw.x = Some(encode(&x));
            }
        }
        raw
    }
}
