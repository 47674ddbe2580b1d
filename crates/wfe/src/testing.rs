//! Signing keys and JWS builders for unit tests.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, RsaKeyPair, ECDSA_P256_SHA256_FIXED_SIGNING,
    ECDSA_P384_SHA384_FIXED_SIGNING, RSA_PKCS1_SHA256,
};
use serde_json::{json, Value};

use crate::jwk::{EcCurve, JsonWebKey, PublicKey};

/// PKCS#8 RSA-2048 private key and its public JWK.
const RSA_PKCS8: &[u8] = include_bytes!("../testdata/rsa2048.pk8");
const RSA_JWK: &str = include_str!("../testdata/rsa2048.jwk.json");

/// A P-521 public key and one ES512 signature made with it.
pub(crate) const P521_X: &str = "AFJZ0w5cfBJH4apEU7rxdt3NZkEnB1GZjWenNtfhf8095LlkD23XGUnczMKzwTN7N27nPbX2HtqAi0wiuRyLPULD";
pub(crate) const P521_Y: &str = "AI_wZwpaHMJRV6nOC1QvXLNKfc6xic0YdLVMdDjNAlo-Bx4NpG8xJTYszySB13RdrYagDJ_afS5T80yHPdw9xhFJ";
pub(crate) const P521_MESSAGE: &str = "eyJhbGciOiJFUzUxMiJ9.eyJoZWxsbyI6IndvcmxkIn0";
pub(crate) const P521_SIGNATURE: &str = "AJjkqBc0YEJpekQWniiyK8g81A6uUdT6S3TSIXqDV2jt4urrDp42gO7ZTDXpowk-JZTxf35tRKWdFy4ZN_7f5zROADi_10VTXAhm6W1rujACwPhimB6wlyVlj3IK4qY5eurv2_C5XNjQU7YlPvPIQVRAfpsXdLw3RT1NY1LQRZkG-bHl";

pub(crate) enum TestKey {
    Rsa(RsaKeyPair),
    Ec(EcdsaKeyPair, EcCurve),
}

pub(crate) fn rsa_key() -> TestKey {
    TestKey::Rsa(RsaKeyPair::from_pkcs8(RSA_PKCS8).unwrap())
}

/// Fresh P-256 or P-384 key.
pub(crate) fn ec_key(curve: EcCurve) -> TestKey {
    let alg = match curve {
        EcCurve::P256 => &ECDSA_P256_SHA256_FIXED_SIGNING,
        EcCurve::P384 => &ECDSA_P384_SHA384_FIXED_SIGNING,
        EcCurve::P521 => panic!("ring cannot sign with P-521"),
    };
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(alg, &rng).unwrap();
    TestKey::Ec(
        EcdsaKeyPair::from_pkcs8(alg, pkcs8.as_ref(), &rng).unwrap(),
        curve,
    )
}

impl TestKey {
    pub(crate) fn jwk(&self) -> JsonWebKey {
        match self {
            TestKey::Rsa(_) => serde_json::from_str(RSA_JWK).unwrap(),
            TestKey::Ec(pair, curve) => {
                let point = pair.public_key().as_ref();
                let len = curve.coordinate_len();
                JsonWebKey::new(PublicKey::Ec {
                    curve: *curve,
                    x: point[1..1 + len].to_vec(),
                    y: point[1 + len..].to_vec(),
                })
            }
        }
    }

    pub(crate) fn alg(&self) -> &'static str {
        match self {
            TestKey::Rsa(_) => "RS256",
            TestKey::Ec(_, curve) => curve.signature_algorithm().as_str(),
        }
    }

    pub(crate) fn sign(&self, message: &[u8]) -> Vec<u8> {
        let rng = SystemRandom::new();
        match self {
            TestKey::Rsa(pair) => {
                let mut signature = vec![0u8; 256];
                pair.sign(&RSA_PKCS1_SHA256, &rng, message, &mut signature)
                    .unwrap();
                signature
            }
            TestKey::Ec(pair, _) => pair.sign(&rng, message).unwrap().as_ref().to_vec(),
        }
    }

    /// Flattened JWS over `payload` with the given protected header.
    pub(crate) fn sign_jws(&self, protected: &Value, payload: &[u8]) -> Vec<u8> {
        let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(protected).unwrap());
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let signature = self.sign(format!("{}.{}", protected, payload).as_bytes());
        serde_json::to_vec(&json!({
            "protected": protected,
            "payload": payload,
            "signature": URL_SAFE_NO_PAD.encode(signature),
        }))
        .unwrap()
    }

    /// Header for a request authenticated by an embedded JWK.
    pub(crate) fn jwk_header(&self, nonce: &str, url: &str) -> Value {
        json!({
            "alg": self.alg(),
            "jwk": self.jwk(),
            "nonce": nonce,
            "url": url,
        })
    }

    /// Header for a request authenticated by an account URL.
    pub(crate) fn kid_header(&self, kid: &str, nonce: &str, url: &str) -> Value {
        json!({
            "alg": self.alg(),
            "kid": kid,
            "nonce": nonce,
            "url": url,
        })
    }
}
