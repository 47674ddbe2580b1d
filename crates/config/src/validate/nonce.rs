//! Nonce service and redemption validation

use super::{is_base64url, ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::{NonceServiceConfig, RedemptionConfig};
use std::collections::HashSet;
use std::net::SocketAddr;

const PREFIX_LENGTHS: [usize; 2] = [4, 8];

/// Validate the nonce service section
pub fn validate_nonce_service(config: &NonceServiceConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.listen_address.parse::<SocketAddr>().is_err() {
        result.add_error(ValidationError::new(
            ErrorCategory::Nonce,
            format!(
                "listen_address '{}' is not a socket address",
                config.listen_address
            ),
        ));
    }

    if let Some(addr) = &config.metrics_address {
        if addr.parse::<SocketAddr>().is_err() {
            result.add_error(ValidationError::new(
                ErrorCategory::Nonce,
                format!("metrics_address '{}' is not a socket address", addr),
            ));
        } else if *addr == config.listen_address {
            result.add_error(ValidationError::new(
                ErrorCategory::Nonce,
                "metrics_address must differ from listen_address",
            ));
        }
    }

    if let Some(prefix) = &config.prefix {
        if let Some(problem) = prefix_problem(prefix) {
            result.add_error(ValidationError::new(
                ErrorCategory::Nonce,
                format!("prefix '{}' {}", prefix, problem),
            ));
        }
        if config.prefix_key.is_some() {
            result.add_error(ValidationError::new(
                ErrorCategory::Nonce,
                "prefix and prefix_key are mutually exclusive",
            ));
        }
    }

    if matches!(&config.prefix_key, Some(key) if key.is_empty()) {
        result.add_error(ValidationError::new(
            ErrorCategory::Nonce,
            "prefix_key must not be empty",
        ));
    }

    if config.max_used == 0 {
        result.add_warning(ValidationWarning::new(
            "nonce max_used is 0, the default window will be used",
        ));
    }

    result
}

/// Validate the redemption section
pub fn validate_redemption(config: &RedemptionConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    match config {
        RedemptionConfig::Disabled => {}
        RedemptionConfig::Static {
            prefixes,
            rpc_timeout_ms,
        } => {
            let lengths: HashSet<usize> = prefixes.keys().map(|p| p.len()).collect();
            if lengths.len() > 1 {
                result.add_error(ValidationError::new(
                    ErrorCategory::Redemption,
                    "static prefixes must all have the same length",
                ));
            }
            for (prefix, address) in prefixes {
                if let Some(problem) = prefix_problem(prefix) {
                    result.add_error(ValidationError::new(
                        ErrorCategory::Redemption,
                        format!("static prefix '{}' {}", prefix, problem),
                    ));
                }
                if address.is_empty() {
                    result.add_error(ValidationError::new(
                        ErrorCategory::Redemption,
                        format!("static prefix '{}' has no backend address", prefix),
                    ));
                }
            }
            check_timeout(*rpc_timeout_ms, &mut result);
        }
        RedemptionConfig::Dynamic {
            hmac_key,
            backends,
            rpc_timeout_ms,
        } => {
            if hmac_key.is_empty() {
                result.add_error(ValidationError::new(
                    ErrorCategory::Redemption,
                    "dynamic redemption requires a non-empty hmac_key",
                ));
            }
            if backends.is_empty() {
                result.add_error(ValidationError::new(
                    ErrorCategory::Redemption,
                    "dynamic redemption requires at least one backend",
                ));
            }
            let mut seen = HashSet::new();
            for backend in backends {
                if !seen.insert(backend.as_str()) {
                    result.add_error(ValidationError::new(
                        ErrorCategory::Redemption,
                        format!("backend '{}' listed more than once", backend),
                    ));
                }
            }
            check_timeout(*rpc_timeout_ms, &mut result);
        }
    }

    result
}

fn prefix_problem(prefix: &str) -> Option<&'static str> {
    if !PREFIX_LENGTHS.contains(&prefix.len()) {
        return Some("must be 4 or 8 characters");
    }
    if !is_base64url(prefix) {
        return Some("must use the base64url alphabet");
    }
    None
}

fn check_timeout(rpc_timeout_ms: u64, result: &mut ValidationResult) {
    if rpc_timeout_ms == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Redemption,
            "rpc_timeout_ms must be greater than 0",
        ));
    }
}
