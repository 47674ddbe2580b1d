//! Backend service error taxonomy.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by calls that cross a process boundary (account
/// storage, nonce redemption).
///
/// `NotFound` is kept distinct so callers can tell "no such object" from
/// a transport failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("request canceled")]
    Canceled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Whether a retry may succeed without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Unavailable(_) | ServiceError::Timeout(_) | ServiceError::RateLimited(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ServiceError::Unavailable("down".into()).is_retryable());
        assert!(ServiceError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ServiceError::NotFound("acct".into()).is_retryable());
        assert!(!ServiceError::Internal("boom".into()).is_retryable());
    }
}
