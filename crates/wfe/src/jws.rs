//! Flattened JSON JWS envelopes.
//!
//! Only the flattened serialization with a single `signature` is accepted.
//! All header parameters must sit in the integrity-protected header; an
//! unprotected `header` member or a `signatures` array rejects the body
//! before any cryptography runs.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::trace;

use crate::jwk::{JsonWebKey, SignatureAlgorithm, SignatureError};

/// Why a request body is not an acceptable JWS.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwsError {
    #[error("Parse error reading JWS")]
    Unmarshal,

    #[error("JWS \"header\" field not allowed. All headers must be in \"protected\" field")]
    UnprotectedHeader,

    #[error(
        "JWS \"signatures\" field not allowed. Only the \"signature\" field should contain a signature"
    )]
    MultipleSignatures,

    /// The envelope is JSON but not a usable JWS. The reason is for logs
    /// only; callers see the generic parse error.
    #[error("Parse error reading JWS")]
    Parse(&'static str),

    #[error("POST JWS not signed")]
    NotSigned,
}

impl JwsError {
    /// Label for the `jose_errors` counter.
    pub fn stat_label(&self) -> &'static str {
        match self {
            JwsError::Unmarshal => "JWSUnmarshalFailed",
            JwsError::UnprotectedHeader => "JWSUnprotectedHeaders",
            JwsError::MultipleSignatures => "JWSMultiSig",
            JwsError::Parse(_) => "JWSParseError",
            JwsError::NotSigned => "JWSEmptySignature",
        }
    }
}

/// Parameters of the protected header.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectedHeader {
    pub algorithm: String,
    pub jwk: Option<JsonWebKey>,
    /// Account URL. An empty `kid` is treated as absent.
    pub key_id: Option<String>,
    pub nonce: Option<String>,
    /// Every other member, including `url`.
    pub extra: Map<String, Value>,
}

impl ProtectedHeader {
    fn from_json(mut members: Map<String, Value>) -> Result<Self, JwsError> {
        let algorithm = match members.remove("alg") {
            Some(Value::String(alg)) => alg,
            _ => return Err(JwsError::Parse("protected header has no algorithm")),
        };

        let jwk = match members.remove("jwk") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value::<JsonWebKey>(value)
                    .map_err(|_| JwsError::Parse("embedded jwk did not decode"))?,
            ),
        };

        let key_id = optional_string(members.remove("kid"), "kid is not a string")?
            .filter(|kid| !kid.is_empty());
        let nonce = optional_string(members.remove("nonce"), "nonce is not a string")?;

        Ok(Self {
            algorithm,
            jwk,
            key_id,
            nonce,
            extra: members,
        })
    }

    /// The `url` member when it is a string.
    pub fn url(&self) -> Option<&str> {
        self.extra.get("url").and_then(Value::as_str)
    }
}

fn optional_string(value: Option<Value>, reason: &'static str) -> Result<Option<String>, JwsError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(JwsError::Parse(reason)),
    }
}

fn decode_member(value: &str, reason: &'static str) -> Result<Vec<u8>, JwsError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| JwsError::Parse(reason))
}

/// A parsed, not yet verified, JWS.
#[derive(Debug, Clone)]
pub struct Jws {
    protected: String,
    encoded_payload: String,
    payload: Vec<u8>,
    signature: Vec<u8>,
    header: ProtectedHeader,
}

impl Jws {
    /// Parse a flattened JSON JWS.
    pub fn parse(body: &[u8]) -> Result<Self, JwsError> {
        let Ok(Value::Object(mut envelope)) = serde_json::from_slice::<Value>(body) else {
            return Err(JwsError::Unmarshal);
        };

        match envelope.remove("header") {
            None | Some(Value::Null) => {}
            Some(_) => return Err(JwsError::UnprotectedHeader),
        }

        match envelope.remove("signatures") {
            None | Some(Value::Null) => {}
            Some(Value::Array(signatures)) if signatures.is_empty() => {}
            Some(Value::Array(_)) => return Err(JwsError::MultipleSignatures),
            Some(_) => return Err(JwsError::Unmarshal),
        }

        let protected = match envelope.remove("protected") {
            Some(Value::String(protected)) => protected,
            _ => return Err(JwsError::Parse("missing protected header")),
        };
        let encoded_payload = match envelope.remove("payload") {
            Some(Value::String(payload)) => payload,
            _ => return Err(JwsError::Parse("missing payload")),
        };
        let signature = match envelope.remove("signature") {
            None | Some(Value::Null) => return Err(JwsError::NotSigned),
            Some(Value::String(signature)) => decode_member(&signature, "signature is not base64url")?,
            Some(_) => return Err(JwsError::Parse("signature is not a string")),
        };
        if signature.is_empty() {
            return Err(JwsError::NotSigned);
        }

        let header_bytes = decode_member(&protected, "protected header is not base64url")?;
        let Ok(Value::Object(members)) = serde_json::from_slice::<Value>(&header_bytes) else {
            return Err(JwsError::Parse("protected header is not a JSON object"));
        };
        let header = ProtectedHeader::from_json(members)?;
        let payload = decode_member(&encoded_payload, "payload is not base64url")?;

        trace!(alg = %header.algorithm, "Parsed JWS");

        Ok(Self {
            protected,
            encoded_payload,
            payload,
            signature,
            header,
        })
    }

    pub fn header(&self) -> &ProtectedHeader {
        &self.header
    }

    /// The decoded payload. Not authenticated until [`Jws::verify`] succeeds.
    pub fn unverified_payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// `BASE64URL(protected) || '.' || BASE64URL(payload)`, exactly as sent.
    pub fn signing_input(&self) -> Vec<u8> {
        let mut input =
            Vec::with_capacity(self.protected.len() + 1 + self.encoded_payload.len());
        input.extend_from_slice(self.protected.as_bytes());
        input.push(b'.');
        input.extend_from_slice(self.encoded_payload.as_bytes());
        input
    }

    /// Verify the signature with `key` and return the payload.
    pub fn verify(
        &self,
        key: &JsonWebKey,
        algorithm: SignatureAlgorithm,
    ) -> Result<&[u8], SignatureError> {
        key.verify(algorithm, &self.signing_input(), &self.signature)?;
        Ok(&self.payload)
    }
}
