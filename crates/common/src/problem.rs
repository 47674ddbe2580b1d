//! Caller-facing problem documents.
//!
//! Every rejection produced by the verification layer is a single
//! [`ProblemDetails`] carrying a stable machine-readable [`ProblemKind`]
//! and a human-readable detail string. The serialized form follows the
//! ACME error document layout (`type`, `detail`, `status`).

use http::StatusCode;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use crate::errors::ServiceError;

const ACME_ERROR_NS: &str = "urn:ietf:params:acme:error:";

/// Stable classification of a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProblemKind {
    /// Structurally bad request: JSON, JWS or signature shape.
    Malformed,
    /// Authenticated but not permitted (inactive account, oversized body).
    Unauthorized,
    /// Key-ID names an account that does not exist.
    AccountDoesNotExist,
    /// A referenced object does not exist.
    NotFound,
    /// Missing, invalid or replayed anti-replay nonce.
    BadNonce,
    /// Signature algorithm not acceptable for the key.
    BadSignatureAlgorithm,
    /// Public key rejected by key policy.
    BadPublicKey,
    /// Caller exceeded a rate limit.
    RateLimited,
    /// A backend is temporarily unreachable; retryable.
    Unavailable,
    /// Internal invariant violation.
    ServerInternal,
}

impl ProblemKind {
    /// ACME error type suffix.
    fn type_suffix(&self) -> &'static str {
        match self {
            ProblemKind::Malformed | ProblemKind::NotFound => "malformed",
            ProblemKind::Unauthorized => "unauthorized",
            ProblemKind::AccountDoesNotExist => "accountDoesNotExist",
            ProblemKind::BadNonce => "badNonce",
            ProblemKind::BadSignatureAlgorithm => "badSignatureAlgorithm",
            ProblemKind::BadPublicKey => "badPublicKey",
            ProblemKind::RateLimited => "rateLimited",
            ProblemKind::Unavailable | ProblemKind::ServerInternal => "serverInternal",
        }
    }

    /// Full ACME error type URN.
    pub fn type_urn(&self) -> String {
        format!("{}{}", ACME_ERROR_NS, self.type_suffix())
    }

    /// Default HTTP status for this kind.
    pub fn default_status(&self) -> StatusCode {
        match self {
            ProblemKind::Malformed
            | ProblemKind::AccountDoesNotExist
            | ProblemKind::BadNonce
            | ProblemKind::BadSignatureAlgorithm
            | ProblemKind::BadPublicKey => StatusCode::BAD_REQUEST,
            ProblemKind::Unauthorized => StatusCode::FORBIDDEN,
            ProblemKind::NotFound => StatusCode::NOT_FOUND,
            ProblemKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ProblemKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ProblemKind::ServerInternal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProblemKind::Malformed => "malformed",
            ProblemKind::Unauthorized => "unauthorized",
            ProblemKind::AccountDoesNotExist => "account_does_not_exist",
            ProblemKind::NotFound => "not_found",
            ProblemKind::BadNonce => "bad_nonce",
            ProblemKind::BadSignatureAlgorithm => "bad_signature_algorithm",
            ProblemKind::BadPublicKey => "bad_public_key",
            ProblemKind::RateLimited => "rate_limited",
            ProblemKind::Unavailable => "unavailable",
            ProblemKind::ServerInternal => "server_internal",
        };
        f.write_str(name)
    }
}

/// A single rejection returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct ProblemDetails {
    pub kind: ProblemKind,
    pub detail: String,
    pub status: StatusCode,
}

impl ProblemDetails {
    /// Create a problem with the kind's default status.
    pub fn new(kind: ProblemKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            status: kind.default_status(),
        }
    }

    /// Override the HTTP status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::Malformed, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::Unauthorized, detail)
    }

    pub fn account_does_not_exist(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::AccountDoesNotExist, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::NotFound, detail)
    }

    pub fn bad_nonce(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::BadNonce, detail)
    }

    pub fn bad_signature_algorithm(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::BadSignatureAlgorithm, detail)
    }

    pub fn bad_public_key(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::BadPublicKey, detail)
    }

    pub fn rate_limited(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::RateLimited, detail)
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::Unavailable, detail)
    }

    pub fn server_internal(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::ServerInternal, detail)
    }

    /// POST without a Content-Length header.
    pub fn content_length_required() -> Self {
        Self::malformed("missing Content-Length header").with_status(StatusCode::LENGTH_REQUIRED)
    }

    /// POST with a Content-Type other than `application/jose+json`.
    pub fn invalid_content_type(detail: impl Into<String>) -> Self {
        Self::malformed(detail).with_status(StatusCode::UNSUPPORTED_MEDIA_TYPE)
    }

    /// Translate a backend error into a problem at the service boundary.
    ///
    /// Internal failures only expose `msg`; the backend's own message is
    /// kept out of the caller-visible detail.
    pub fn for_service_error(err: &ServiceError, msg: &str) -> Self {
        match err {
            ServiceError::NotFound(_) => Self::not_found(format!("{} :: {}", msg, err)),
            ServiceError::RateLimited(_) => Self::rate_limited(format!("{} :: {}", msg, err)),
            ServiceError::Unavailable(_) | ServiceError::Timeout(_) => {
                Self::unavailable(format!("{} :: {}", msg, err))
            }
            ServiceError::Canceled => Self::unavailable(format!("{} :: request canceled", msg)),
            ServiceError::Internal(_) => Self::server_internal(msg),
        }
    }
}

impl Serialize for ProblemDetails {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut doc = serializer.serialize_struct("ProblemDetails", 3)?;
        doc.serialize_field("type", &self.kind.type_urn())?;
        doc.serialize_field("detail", &self.detail)?;
        doc.serialize_field("status", &self.status.as_u16())?;
        doc.end()
    }
}
