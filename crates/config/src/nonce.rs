//! Nonce service and nonce redemption configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default size of the nonce redemption window.
pub const DEFAULT_MAX_USED: usize = 65536;

/// Settings for one nonce service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NonceServiceConfig {
    /// Address the RPC listener binds to. Also the input to prefix
    /// derivation when `prefix_key` is set.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Redemption window size
    #[serde(default = "default_max_used")]
    pub max_used: usize,

    /// Explicit prefix (4 or 8 base64url characters)
    #[serde(default)]
    pub prefix: Option<String>,

    /// Derive the prefix from `listen_address` with this HMAC key
    #[serde(default)]
    pub prefix_key: Option<String>,

    /// Serve Prometheus metrics over HTTP on this address
    #[serde(default)]
    pub metrics_address: Option<String>,
}

impl Default for NonceServiceConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            max_used: default_max_used(),
            prefix: None,
            prefix_key: None,
            metrics_address: None,
        }
    }
}

fn default_listen_address() -> String {
    "127.0.0.1:9101".to_string()
}

fn default_max_used() -> usize {
    DEFAULT_MAX_USED
}

/// How the verifier routes nonce redemption.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RedemptionConfig {
    /// Nothing can be redeemed; every nonce is invalid
    #[default]
    Disabled,

    /// Fixed `prefix -> backend address` map
    Static {
        #[serde(default)]
        prefixes: HashMap<String, String>,
        #[serde(default = "default_rpc_timeout_ms")]
        rpc_timeout_ms: u64,
    },

    /// Prefix-aware routing over a backend list; prefixes are derived from
    /// each backend address with `hmac_key`
    Dynamic {
        hmac_key: String,
        backends: Vec<String>,
        #[serde(default = "default_rpc_timeout_ms")]
        rpc_timeout_ms: u64,
    },
}

fn default_rpc_timeout_ms() -> u64 {
    1000
}

impl RedemptionConfig {
    /// Short name for logging.
    pub fn mode_name(&self) -> &'static str {
        match self {
            RedemptionConfig::Disabled => "disabled",
            RedemptionConfig::Static { .. } => "static",
            RedemptionConfig::Dynamic { .. } => "dynamic",
        }
    }

    /// Timeout for a single redemption RPC.
    pub fn rpc_timeout(&self) -> Duration {
        match self {
            RedemptionConfig::Disabled => Duration::from_millis(default_rpc_timeout_ms()),
            RedemptionConfig::Static { rpc_timeout_ms, .. }
            | RedemptionConfig::Dynamic { rpc_timeout_ms, .. } => {
                Duration::from_millis(*rpc_timeout_ms)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_mode_parses() {
        let config: RedemptionConfig = toml::from_str(
            r#"
mode = "static"
[prefixes]
zinc = "10.0.0.1:9101"
wood = "10.0.0.2:9101"
"#,
        )
        .unwrap();

        let RedemptionConfig::Static {
            prefixes,
            rpc_timeout_ms,
        } = &config
        else {
            panic!("expected static mode");
        };
        assert_eq!(prefixes.len(), 2);
        assert_eq!(*rpc_timeout_ms, 1000);
        assert_eq!(config.rpc_timeout(), Duration::from_secs(1));
        assert_eq!(config.mode_name(), "static");
    }

    #[test]
    fn test_dynamic_mode_requires_key() {
        let err = toml::from_str::<RedemptionConfig>("mode = \"dynamic\"\nbackends = []");
        assert!(err.is_err());
    }
}
