//! Verifier and key policy validation

use super::{is_base64url, ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::{KeyPolicyConfig, WfeConfig};
use url::Url;

/// Validate the verifier section
pub fn validate_wfe(config: &WfeConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if let Some(prefix) = &config.legacy_key_id_prefix {
        match Url::parse(prefix) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                if !prefix.ends_with('/') {
                    result.add_warning(ValidationWarning::new(format!(
                        "legacy_key_id_prefix '{}' does not end with '/'",
                        prefix
                    )));
                }
            }
            Ok(url) => {
                result.add_error(ValidationError::new(
                    ErrorCategory::Wfe,
                    format!(
                        "legacy_key_id_prefix must be an http(s) URL, got scheme '{}'",
                        url.scheme()
                    ),
                ));
            }
            Err(e) => {
                result.add_error(ValidationError::new(
                    ErrorCategory::Wfe,
                    format!("legacy_key_id_prefix '{}' is not a URL: {}", prefix, e),
                ));
            }
        }
    }

    if config.max_request_size == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Wfe,
            "max_request_size must be greater than 0",
        ));
    }

    if config.account_cache.size == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Wfe,
            "account_cache.size must be greater than 0",
        ));
    }

    if config.account_cache.ttl_seconds == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Wfe,
            "account_cache.ttl_seconds must be greater than 0",
        ));
    }

    result
}

/// Validate the key policy section
pub fn validate_key_policy(config: &KeyPolicyConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if !config.allow_rsa
        && !config.allow_ecdsa_p256
        && !config.allow_ecdsa_p384
        && !config.allow_ecdsa_p521
    {
        result.add_error(ValidationError::new(
            ErrorCategory::KeyPolicy,
            "key policy allows no key types",
        ));
    }

    for thumbprint in &config.blocked_thumbprints {
        // SHA-256 digests encode to 43 unpadded base64url characters.
        if thumbprint.len() != 43 || !is_base64url(thumbprint) {
            result.add_error(ValidationError::new(
                ErrorCategory::KeyPolicy,
                format!("blocked thumbprint '{}' is not a base64url SHA-256", thumbprint),
            ));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccountCacheConfig;

    #[test]
    fn test_legacy_prefix() {
        let mut config = WfeConfig {
            legacy_key_id_prefix: Some("http://acme.example/reg/".into()),
            ..Default::default()
        };
        let result = validate_wfe(&config);
        assert!(result.is_ok());
        assert!(result.warnings.is_empty());

        config.legacy_key_id_prefix = Some("http://acme.example/reg".into());
        assert_eq!(validate_wfe(&config).warnings.len(), 1);

        config.legacy_key_id_prefix = Some("ftp://acme.example/reg/".into());
        assert!(!validate_wfe(&config).is_ok());

        config.legacy_key_id_prefix = Some("not a url".into());
        assert!(!validate_wfe(&config).is_ok());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let config = WfeConfig {
            max_request_size: 0,
            account_cache: AccountCacheConfig {
                size: 0,
                ttl_seconds: 0,
            },
            ..Default::default()
        };
        assert_eq!(validate_wfe(&config).errors.len(), 3);
    }

    #[test]
    fn test_key_policy() {
        assert!(validate_key_policy(&KeyPolicyConfig::default()).is_ok());

        let config = KeyPolicyConfig {
            allow_rsa: false,
            allow_ecdsa_p256: false,
            allow_ecdsa_p384: false,
            allow_ecdsa_p521: false,
            blocked_thumbprints: vec!["short".into()],
        };
        assert_eq!(validate_key_policy(&config).errors.len(), 2);
    }
}
