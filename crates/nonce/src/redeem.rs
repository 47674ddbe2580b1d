//! Nonce issuance/redemption capabilities and redemption routing.
//!
//! [`Getter`] and [`Redeemer`] are implemented in-process by
//! [`NonceServer`](crate::NonceServer), across the network by
//! [`NonceClient`](crate::NonceClient), and by the routing layers in this
//! module and in [`balancer`](crate::balancer).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use portcullis_config::RedemptionConfig;

use crate::balancer::{Backend, BalancedRedeemer};
use crate::client::NonceClient;
use crate::errors::{NonceError, PickError, RpcError};
use crate::prefix::{split_nonce, validate_prefix, LEGACY_PREFIX_LEN, PREFIX_LEN};
use crate::protocol::{NonceMessage, ValidMessage};
use crate::service::ENCODED_BODY_LEN;

/// Issues nonces.
#[async_trait]
pub trait Getter: Send + Sync {
    async fn nonce(&self) -> Result<NonceMessage, RpcError>;
}

/// Redeems nonces.
#[async_trait]
pub trait Redeemer: Send + Sync {
    async fn redeem(&self, request: RedeemRequest) -> Result<ValidMessage, RpcError>;
}

// ============================================================================
// Routing hints
// ============================================================================

/// A routing hint value as attached by the caller.
///
/// Hints travel next to the request the way RPC metadata does, where a
/// value may be either text or raw bytes. Only text is meaningful for
/// nonce routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HintValue {
    Text(String),
    Binary(Vec<u8>),
}

impl HintValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            HintValue::Text(s) => Some(s),
            HintValue::Binary(_) => None,
        }
    }
}

impl From<String> for HintValue {
    fn from(s: String) -> Self {
        HintValue::Text(s)
    }
}

impl From<&str> for HintValue {
    fn from(s: &str) -> Self {
        HintValue::Text(s.to_string())
    }
}

/// Per-call routing parameters consumed by a [`Picker`](crate::balancer::Picker).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingHints {
    /// Prefix of the nonce being redeemed.
    pub destination_prefix: Option<HintValue>,
    /// Key used to derive backend prefixes.
    pub hmac_key: Option<HintValue>,
}

impl RoutingHints {
    pub fn new(prefix: impl Into<HintValue>, hmac_key: impl Into<HintValue>) -> Self {
        Self {
            destination_prefix: Some(prefix.into()),
            hmac_key: Some(hmac_key.into()),
        }
    }

    /// Return `(prefix, hmac_key)` if both hints are present and textual.
    pub fn validate(&self) -> Result<(&str, &str), PickError> {
        let prefix = self
            .destination_prefix
            .as_ref()
            .ok_or(PickError::MissingPrefix)?
            .as_text()
            .ok_or(PickError::InvalidPrefixType)?;
        let key = self
            .hmac_key
            .as_ref()
            .ok_or(PickError::MissingHmacKey)?
            .as_text()
            .ok_or(PickError::InvalidHmacKeyType)?;
        Ok((prefix, key))
    }
}

/// A redemption call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedeemRequest {
    pub nonce: String,
    pub hints: RoutingHints,
}

impl RedeemRequest {
    pub fn new(nonce: impl Into<String>) -> Self {
        Self {
            nonce: nonce.into(),
            hints: RoutingHints::default(),
        }
    }

    pub fn with_hints(mut self, hints: RoutingHints) -> Self {
        self.hints = hints;
        self
    }
}

// ============================================================================
// Static prefix map
// ============================================================================

/// Routes redemptions through a fixed `prefix -> redeemer` map.
///
/// Without a map every nonce is invalid; this is the degenerate
/// "redemption disabled" configuration.
#[derive(Clone)]
pub struct StaticPrefixRedeemer {
    prefixes: Option<HashMap<String, Arc<dyn Redeemer>>>,
    prefix_len: usize,
}

impl StaticPrefixRedeemer {
    /// Map keyed by legacy 4-character prefixes.
    pub fn new(prefixes: HashMap<String, Arc<dyn Redeemer>>) -> Self {
        Self {
            prefixes: Some(prefixes),
            prefix_len: LEGACY_PREFIX_LEN,
        }
    }

    /// A router with no map at all.
    pub fn disabled() -> Self {
        Self {
            prefixes: None,
            prefix_len: LEGACY_PREFIX_LEN,
        }
    }

    /// Use a different key length for the map.
    pub fn with_prefix_len(mut self, prefix_len: usize) -> Self {
        self.prefix_len = prefix_len;
        self
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// Redeem `nonce` at the backend owning its prefix.
    ///
    /// Unknown prefixes and short nonces are invalid, not errors.
    pub async fn redeem_nonce(&self, nonce: &str) -> Result<bool, RpcError> {
        let Some(prefixes) = &self.prefixes else {
            trace!("No prefix map configured, nonce treated as invalid");
            return Ok(false);
        };

        let Some((prefix, _)) = split_nonce(nonce, self.prefix_len) else {
            return Ok(false);
        };

        let Some(redeemer) = prefixes.get(prefix) else {
            debug!(prefix = %prefix, "No redeemer for nonce prefix");
            return Ok(false);
        };

        let reply = redeemer.redeem(RedeemRequest::new(nonce)).await?;
        Ok(reply.valid)
    }
}

#[async_trait]
impl Redeemer for StaticPrefixRedeemer {
    async fn redeem(&self, request: RedeemRequest) -> Result<ValidMessage, RpcError> {
        let valid = self.redeem_nonce(&request.nonce).await?;
        Ok(ValidMessage { valid })
    }
}

// ============================================================================
// Strategy selection
// ============================================================================

/// How the front end redeems nonces, chosen once at startup.
#[derive(Clone)]
pub enum NonceRedemption {
    /// Fixed prefix map.
    Static(StaticPrefixRedeemer),
    /// Prefix-aware load balancer; each call carries routing hints built
    /// from the nonce prefix and `hmac_key`.
    Dynamic {
        redeemer: Arc<dyn Redeemer>,
        hmac_key: String,
    },
}

impl NonceRedemption {
    /// Build the configured strategy. Backend connections are dialed
    /// lazily on first use.
    pub fn from_config(config: &RedemptionConfig) -> Result<Self, NonceError> {
        let timeout = config.rpc_timeout();

        match config {
            RedemptionConfig::Disabled => {
                warn!("Nonce redemption disabled, all nonces will be rejected");
                Ok(NonceRedemption::Static(StaticPrefixRedeemer::disabled()))
            }
            RedemptionConfig::Static { prefixes, .. } => {
                let mut prefix_len = None;
                let mut map: HashMap<String, Arc<dyn Redeemer>> = HashMap::new();

                for (prefix, address) in prefixes {
                    validate_prefix(prefix)?;
                    match prefix_len {
                        Some(len) if len != prefix.len() => {
                            return Err(NonceError::InvalidPrefix {
                                prefix: prefix.clone(),
                                reason: "static prefixes must share one length",
                            });
                        }
                        _ => prefix_len = Some(prefix.len()),
                    }
                    map.insert(
                        prefix.clone(),
                        Arc::new(NonceClient::new(address.clone(), timeout)),
                    );
                }

                info!(prefixes = map.len(), "Using static nonce prefix map");
                Ok(NonceRedemption::Static(
                    StaticPrefixRedeemer::new(map)
                        .with_prefix_len(prefix_len.unwrap_or(LEGACY_PREFIX_LEN)),
                ))
            }
            RedemptionConfig::Dynamic {
                hmac_key, backends, ..
            } => {
                if hmac_key.is_empty() {
                    return Err(NonceError::Config(
                        "dynamic redemption requires an hmac key".to_string(),
                    ));
                }
                let backends: Vec<Backend> = backends
                    .iter()
                    .map(|address| {
                        Backend::new(
                            address.clone(),
                            Arc::new(NonceClient::new(address.clone(), timeout)),
                        )
                    })
                    .collect();

                info!(backends = ?backends, "Using prefix-aware nonce redemption");
                Ok(NonceRedemption::Dynamic {
                    redeemer: Arc::new(BalancedRedeemer::with_backends(backends)),
                    hmac_key: hmac_key.clone(),
                })
            }
        }
    }

    pub fn prefix_len(&self) -> usize {
        match self {
            NonceRedemption::Static(map) => map.prefix_len(),
            NonceRedemption::Dynamic { .. } => PREFIX_LEN,
        }
    }

    /// Length of every nonce this router can accept.
    pub fn expected_nonce_len(&self) -> usize {
        self.prefix_len() + ENCODED_BODY_LEN
    }

    /// Redeem a nonce through the selected strategy.
    pub async fn redeem(&self, nonce: &str) -> Result<bool, RpcError> {
        match self {
            NonceRedemption::Static(map) => map.redeem_nonce(nonce).await,
            NonceRedemption::Dynamic { redeemer, hmac_key } => {
                let Some((prefix, _)) = split_nonce(nonce, PREFIX_LEN) else {
                    return Ok(false);
                };
                let request = RedeemRequest::new(nonce)
                    .with_hints(RoutingHints::new(prefix, hmac_key.as_str()));
                Ok(redeemer.redeem(request).await?.valid)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records every nonce it sees and answers with a fixed result.
    pub(crate) struct RecordingRedeemer {
        pub valid: bool,
        pub fail: bool,
        pub seen: Mutex<Vec<RedeemRequest>>,
    }

    impl RecordingRedeemer {
        pub(crate) fn new(valid: bool) -> Arc<Self> {
            Arc::new(Self {
                valid,
                fail: false,
                seen: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn failing() -> Arc<Self> {
            Arc::new(Self {
                valid: false,
                fail: true,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Redeemer for RecordingRedeemer {
        async fn redeem(&self, request: RedeemRequest) -> Result<ValidMessage, RpcError> {
            self.seen.lock().push(request);
            if self.fail {
                return Err(RpcError::ConnectionClosed);
            }
            Ok(ValidMessage { valid: self.valid })
        }
    }

    #[test]
    fn test_hint_validation() {
        let hints = RoutingHints::default();
        assert_eq!(hints.validate(), Err(PickError::MissingPrefix));

        let hints = RoutingHints {
            destination_prefix: Some(HintValue::Binary(vec![1, 2])),
            hmac_key: Some("k".into()),
        };
        assert_eq!(hints.validate(), Err(PickError::InvalidPrefixType));

        let hints = RoutingHints {
            destination_prefix: Some("abcdefgh".into()),
            hmac_key: None,
        };
        assert_eq!(hints.validate(), Err(PickError::MissingHmacKey));

        let hints = RoutingHints {
            destination_prefix: Some("abcdefgh".into()),
            hmac_key: Some(HintValue::Binary(b"k".to_vec())),
        };
        assert_eq!(hints.validate(), Err(PickError::InvalidHmacKeyType));

        let hints = RoutingHints::new("abcdefgh", "k");
        assert_eq!(hints.validate(), Ok(("abcdefgh", "k")));
    }

    #[tokio::test]
    async fn test_static_map_routes_by_prefix() {
        let zinc = RecordingRedeemer::new(true);
        let wood = RecordingRedeemer::new(false);
        let mut map: HashMap<String, Arc<dyn Redeemer>> = HashMap::new();
        map.insert("zinc".into(), zinc.clone());
        map.insert("wood".into(), wood.clone());
        let router = StaticPrefixRedeemer::new(map);

        assert!(router.redeem_nonce("zincABCDEF").await.unwrap());
        assert!(!router.redeem_nonce("woodABCDEF").await.unwrap());
        assert_eq!(zinc.seen.lock().len(), 1);
        assert_eq!(zinc.seen.lock()[0].nonce, "zincABCDEF");
        assert_eq!(wood.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_static_map_unknown_or_short_nonce_invalid() {
        let zinc = RecordingRedeemer::new(true);
        let mut map: HashMap<String, Arc<dyn Redeemer>> = HashMap::new();
        map.insert("zinc".into(), zinc.clone());
        let router = StaticPrefixRedeemer::new(map);

        assert!(!router.redeem_nonce("iron1234").await.unwrap());
        assert!(!router.redeem_nonce("zin").await.unwrap());
        assert!(!router.redeem_nonce("").await.unwrap());
        assert!(zinc.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_static_map_propagates_backend_error() {
        let mut map: HashMap<String, Arc<dyn Redeemer>> = HashMap::new();
        map.insert("zinc".into(), RecordingRedeemer::failing());
        let router = StaticPrefixRedeemer::new(map);

        let err = router.redeem_nonce("zincABCDEF").await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_disabled_map_is_always_invalid() {
        let router = StaticPrefixRedeemer::disabled();
        assert!(!router.redeem_nonce("zincABCDEF").await.unwrap());
    }

    #[test]
    fn test_from_config() {
        let redemption = NonceRedemption::from_config(&RedemptionConfig::Disabled).unwrap();
        assert!(matches!(redemption, NonceRedemption::Static(_)));

        let mut prefixes = HashMap::new();
        prefixes.insert("zincZINC".to_string(), "127.0.0.1:1".to_string());
        let redemption = NonceRedemption::from_config(&RedemptionConfig::Static {
            prefixes,
            rpc_timeout_ms: 100,
        })
        .unwrap();
        assert_eq!(redemption.prefix_len(), 8);

        let err = NonceRedemption::from_config(&RedemptionConfig::Dynamic {
            hmac_key: String::new(),
            backends: vec!["127.0.0.1:1".into()],
            rpc_timeout_ms: 100,
        });
        assert!(matches!(err, Err(NonceError::Config(_))));
    }

    #[tokio::test]
    async fn test_dynamic_strategy_attaches_hints() {
        let backend = RecordingRedeemer::new(true);
        let redemption = NonceRedemption::Dynamic {
            redeemer: backend.clone(),
            hmac_key: "secret".into(),
        };
        assert_eq!(redemption.expected_nonce_len(), PREFIX_LEN + ENCODED_BODY_LEN);

        assert!(redemption.redeem("abcdefghREST").await.unwrap());
        let seen = backend.seen.lock();
        assert_eq!(seen[0].hints, RoutingHints::new("abcdefgh", "secret"));

        drop(seen);
        assert!(!redemption.redeem("short").await.unwrap());
    }
}
