//! Configuration for the Portcullis nonce service and request verifier.
//!
//! Configuration is a single TOML document:
//!
//! ```toml
//! [nonce]
//! listen_address = "127.0.0.1:9101"
//! prefix_key = "secret"
//! metrics_address = "127.0.0.1:9102"
//!
//! [redemption]
//! mode = "dynamic"
//! hmac_key = "secret"
//! backends = ["127.0.0.1:9101"]
//!
//! [wfe]
//! legacy_key_id_prefix = "http://acme.example/reg/"
//!
//! [wfe.account_cache]
//! size = 9000
//! ttl_seconds = 5
//! ```
//!
//! Every section has defaults, so an empty document is a valid (if not very
//! useful) configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, trace};

pub mod nonce;
pub mod validate;
pub mod wfe;

pub use nonce::{NonceServiceConfig, RedemptionConfig, DEFAULT_MAX_USED};
pub use validate::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
pub use wfe::{AccountCacheConfig, KeyPolicyConfig, WfeConfig};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration:\n{0}")]
    Invalid(ValidationResult),
}

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Nonce service instance settings
    #[serde(default)]
    pub nonce: NonceServiceConfig,

    /// How the verifier redeems nonces
    #[serde(default)]
    pub redemption: RedemptionConfig,

    /// Request verifier settings
    #[serde(default)]
    pub wfe: WfeConfig,

    /// Public key acceptance policy
    #[serde(default)]
    pub key_policy: KeyPolicyConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        trace!(path = %path.display(), "Loading configuration file");

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        debug!(
            redemption = config.redemption.mode_name(),
            cache_size = config.wfe.account_cache.size,
            "Parsed configuration"
        );
        Ok(config)
    }

    /// Run all validation rules.
    ///
    /// Returns the warnings on success and every error on failure.
    pub fn validate(&self) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::new();
        result.merge(validate::nonce::validate_nonce_service(&self.nonce));
        result.merge(validate::nonce::validate_redemption(&self.redemption));
        result.merge(validate::wfe::validate_wfe(&self.wfe));
        result.merge(validate::wfe::validate_key_policy(&self.key_policy));
        result.merge(validate::lint::lint_config(self));

        if result.is_ok() {
            Ok(result)
        } else {
            Err(ConfigError::Invalid(result))
        }
    }
}
