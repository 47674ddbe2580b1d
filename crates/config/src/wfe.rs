//! Request verifier, account cache and key policy configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request verifier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WfeConfig {
    /// Alternate Key-ID URL prefix accepted for accounts created before the
    /// `/acme/acct/` layout
    #[serde(default)]
    pub legacy_key_id_prefix: Option<String>,

    /// Largest request body accepted, in bytes
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,

    #[serde(default)]
    pub account_cache: AccountCacheConfig,
}

impl Default for WfeConfig {
    fn default() -> Self {
        Self {
            legacy_key_id_prefix: None,
            max_request_size: default_max_request_size(),
            account_cache: AccountCacheConfig::default(),
        }
    }
}

fn default_max_request_size() -> usize {
    50000
}

/// Account lookup cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountCacheConfig {
    /// Maximum cached accounts
    #[serde(default = "default_cache_size")]
    pub size: usize,

    /// Lifetime of a cached account
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

impl AccountCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for AccountCacheConfig {
    fn default() -> Self {
        Self {
            size: default_cache_size(),
            ttl_seconds: default_cache_ttl(),
        }
    }
}

fn default_cache_size() -> usize {
    9000
}

fn default_cache_ttl() -> u64 {
    5
}

/// Which account public keys are acceptable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyPolicyConfig {
    #[serde(default = "default_true")]
    pub allow_rsa: bool,

    #[serde(default = "default_true")]
    pub allow_ecdsa_p256: bool,

    #[serde(default = "default_true")]
    pub allow_ecdsa_p384: bool,

    #[serde(default)]
    pub allow_ecdsa_p521: bool,

    /// RFC 7638 thumbprints (base64url SHA-256) of blocked keys
    #[serde(default)]
    pub blocked_thumbprints: Vec<String>,
}

impl Default for KeyPolicyConfig {
    fn default() -> Self {
        Self {
            allow_rsa: true,
            allow_ecdsa_p256: true,
            allow_ecdsa_p384: true,
            allow_ecdsa_p521: false,
            blocked_thumbprints: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}
