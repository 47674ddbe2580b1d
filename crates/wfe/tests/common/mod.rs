//! Signing helpers shared by the integration tests.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, RsaKeyPair, ECDSA_P256_SHA256_FIXED_SIGNING, RSA_PKCS1_SHA256,
};
use serde_json::{json, Value};

use portcullis_wfe::{EcCurve, JsonWebKey, PublicKey};

const RSA_PKCS8: &[u8] = include_bytes!("../../testdata/rsa2048.pk8");
const RSA_JWK: &str = include_str!("../../testdata/rsa2048.jwk.json");

pub enum Signer {
    Rsa(RsaKeyPair),
    P256(EcdsaKeyPair),
}

impl Signer {
    pub fn rsa() -> Self {
        Signer::Rsa(RsaKeyPair::from_pkcs8(RSA_PKCS8).unwrap())
    }

    pub fn p256() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
        Signer::P256(
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .unwrap(),
        )
    }

    pub fn jwk(&self) -> JsonWebKey {
        match self {
            Signer::Rsa(_) => serde_json::from_str(RSA_JWK).unwrap(),
            Signer::P256(pair) => {
                let point = pair.public_key().as_ref();
                JsonWebKey::new(PublicKey::Ec {
                    curve: EcCurve::P256,
                    x: point[1..33].to_vec(),
                    y: point[33..].to_vec(),
                })
            }
        }
    }

    pub fn alg(&self) -> &'static str {
        match self {
            Signer::Rsa(_) => "RS256",
            Signer::P256(_) => "ES256",
        }
    }

    /// Flattened JWS over `payload`.
    pub fn sign_jws(&self, protected: &Value, payload: &[u8]) -> Vec<u8> {
        let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(protected).unwrap());
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let input = format!("{}.{}", protected, payload);

        let rng = SystemRandom::new();
        let signature = match self {
            Signer::Rsa(pair) => {
                let mut signature = vec![0u8; 256];
                pair.sign(&RSA_PKCS1_SHA256, &rng, input.as_bytes(), &mut signature)
                    .unwrap();
                signature
            }
            Signer::P256(pair) => pair.sign(&rng, input.as_bytes()).unwrap().as_ref().to_vec(),
        };

        serde_json::to_vec(&json!({
            "protected": protected,
            "payload": payload,
            "signature": URL_SAFE_NO_PAD.encode(signature),
        }))
        .unwrap()
    }

    pub fn kid_header(&self, kid: &str, nonce: &str, url: &str) -> Value {
        json!({"alg": self.alg(), "kid": kid, "nonce": nonce, "url": url})
    }
}
