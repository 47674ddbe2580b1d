//! Nonce service, RPC and routing error types.

use std::time::Duration;
use thiserror::Error;

use portcullis_common::ServiceError;

/// Errors from constructing or operating a [`NonceService`](crate::NonceService).
#[derive(Error, Debug)]
pub enum NonceError {
    #[error("invalid nonce prefix {prefix:?}: {reason}")]
    InvalidPrefix { prefix: String, reason: &'static str },

    #[error("failed to read from the system random number generator")]
    Rng,

    #[error("failed to initialise nonce encryption key")]
    Key,

    #[error("nonce encryption failed")]
    Encryption,

    #[error("nonce counter exhausted")]
    CounterExhausted,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Errors from choosing a redemption backend for a routed nonce.
///
/// The four hint errors mean the caller forgot to attach (or mis-typed)
/// the routing hints; they are wiring defects, not client mistakes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PickError {
    #[error("routing hints carry no destination prefix")]
    MissingPrefix,

    #[error("routing hint destination prefix is not text")]
    InvalidPrefixType,

    #[error("routing hints carry no HMAC key")]
    MissingHmacKey,

    #[error("routing hint HMAC key is not text")]
    InvalidHmacKeyType,

    #[error("no backend available")]
    NoBackendAvailable,
}

/// Nonce RPC errors
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Pick(#[from] PickError),
}

impl From<RpcError> for ServiceError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Timeout(after) => ServiceError::Timeout(after),
            RpcError::ConnectionFailed(_) | RpcError::ConnectionClosed | RpcError::Io(_) => {
                ServiceError::Unavailable(err.to_string())
            }
            RpcError::Pick(PickError::NoBackendAvailable) => {
                ServiceError::Unavailable(err.to_string())
            }
            other => ServiceError::Internal(other.to_string()),
        }
    }
}
