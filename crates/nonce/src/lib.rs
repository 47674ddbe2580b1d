//! Replay-nonce issuance, redemption and routing.
//!
//! Every signed ACME request carries a nonce that must be redeemed exactly
//! once, at the service instance that issued it.
//!
//! # Architecture
//!
//! ```text
//! verifier ── NonceRedemption ─┬─ StaticPrefixRedeemer ──┐
//!                              └─ BalancedRedeemer ──────┤
//!                                   (NoncePicker)        │
//!                                                        ▼
//!                            NonceClient ══ TCP ══ NonceServer ── NonceService
//! ```
//!
//! - [`NonceService`]: counter-based AEAD nonces with a bounded redemption window
//! - [`derive_prefix`]: the HMAC prefix tying a nonce to its backend
//! - [`NonceServer`] / [`NonceClient`]: length-prefixed JSON RPC over TCP
//! - [`StaticPrefixRedeemer`] and [`BalancedRedeemer`]: the two routing
//!   strategies, selected once through [`NonceRedemption`]
//! - [`serve_metrics`]: Prometheus exposition for the service binary

pub mod balancer;
pub mod client;
pub mod errors;
pub mod metrics;
pub mod prefix;
pub mod protocol;
pub mod redeem;
pub mod server;
pub mod service;

pub use balancer::{
    Backend, BackendState, BalancedRedeemer, NoncePicker, NoncePickerBuilder, Picker,
    PickerBuilder,
};
pub use client::NonceClient;
pub use errors::{NonceError, PickError, RpcError};
pub use metrics::{metrics_router, serve_metrics};
pub use prefix::{derive_prefix, LEGACY_PREFIX_LEN, PREFIX_LEN};
pub use protocol::{NonceMessage, ValidMessage, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
pub use redeem::{
    Getter, HintValue, NonceRedemption, RedeemRequest, Redeemer, RoutingHints,
    StaticPrefixRedeemer,
};
pub use server::NonceServer;
pub use service::{NonceMetrics, NonceService, DEFAULT_MAX_USED, ENCODED_BODY_LEN};
