//! Configuration linting for deployment practice
//!
//! Flags settings that are valid but probably not what production wants.

use super::{ValidationResult, ValidationWarning};
use crate::{Config, RedemptionConfig};

/// Lint configuration for best practices
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    match &config.redemption {
        RedemptionConfig::Disabled => {
            result.add_warning(ValidationWarning::new(
                "Nonce redemption is disabled, every signed request will fail its nonce check",
            ));
        }
        RedemptionConfig::Static { prefixes, .. } if prefixes.is_empty() => {
            result.add_warning(ValidationWarning::new(
                "Static redemption has an empty prefix map",
            ));
        }
        RedemptionConfig::Dynamic {
            hmac_key, backends, ..
        } => {
            // The local instance can only be routed to if it derives its
            // prefix with the same key from an address the router knows.
            if let Some(prefix_key) = &config.nonce.prefix_key {
                if prefix_key != hmac_key {
                    result.add_warning(ValidationWarning::new(
                        "nonce.prefix_key differs from redemption.hmac_key, local nonces cannot be routed",
                    ));
                } else if !backends.contains(&config.nonce.listen_address) {
                    result.add_warning(ValidationWarning::new(format!(
                        "nonce.listen_address '{}' is not among the redemption backends",
                        config.nonce.listen_address
                    )));
                }
            }
        }
        _ => {}
    }

    if config.wfe.account_cache.ttl_seconds > 300 {
        result.add_warning(ValidationWarning::new(format!(
            "Account cache TTL of {}s delays deactivation taking effect",
            config.wfe.account_cache.ttl_seconds
        )));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_redemption_warns() {
        let result = lint_config(&Config::default());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.is_ok());
    }

    #[test]
    fn test_mismatched_prefix_key_warns() {
        let mut config = Config::default();
        config.nonce.prefix_key = Some("one".into());
        config.redemption = RedemptionConfig::Dynamic {
            hmac_key: "two".into(),
            backends: vec![config.nonce.listen_address.clone()],
            rpc_timeout_ms: 1000,
        };
        let result = lint_config(&config);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].message.contains("prefix_key"));
    }

    #[test]
    fn test_consistent_dynamic_config_is_quiet() {
        let mut config = Config::default();
        config.nonce.prefix_key = Some("key".into());
        config.redemption = RedemptionConfig::Dynamic {
            hmac_key: "key".into(),
            backends: vec![config.nonce.listen_address.clone()],
            rpc_timeout_ms: 1000,
        };
        assert!(lint_config(&config).warnings.is_empty());
    }
}
