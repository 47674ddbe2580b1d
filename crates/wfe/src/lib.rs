//! Request authentication for the Portcullis ACME front end.
//!
//! Given an inbound POST, [`RequestVerifier`] establishes who signed it
//! (an existing account through its Key-ID, or an embedded public key),
//! that the signature is genuine, that the anti-replay nonce is fresh and
//! that the request was meant for this URL. Everything else an ACME server
//! does happens after this layer has answered.
//!
//! - [`jwk`] / [`jws`]: public keys, flattened JWS parsing and signatures
//! - [`account`] / [`cache`]: account lookup and a short-lived LRU in front of it
//! - [`keypolicy`]: which public keys may act as account keys
//! - [`request`] / [`event`]: the request model and its audit record
//! - [`verify`]: the staged verification pipeline

pub mod account;
pub mod cache;
pub mod event;
pub mod jwk;
pub mod jws;
pub mod keypolicy;
pub mod request;
pub mod stats;
pub mod verify;

#[cfg(test)]
mod testing;

pub use account::{AccountGetter, AcmeStatus, MemoryAccountStore, Registration};
pub use cache::AccountCache;
pub use event::RequestEvent;
pub use jwk::{
    public_keys_equal, EcCurve, JsonWebKey, JwkError, PublicKey, SignatureAlgorithm,
    SignatureError,
};
pub use jws::{Jws, JwsError, ProtectedHeader};
pub use keypolicy::{AcceptAllKeys, GoodKeyPolicy, KeyPolicy, KeyPolicyError};
pub use request::{InboundRequest, JOSE_CONTENT_TYPE};
pub use stats::WfeStats;
pub use verify::{
    check_algorithm, check_jws_auth_type, AccountPost, AlgorithmError, JwsAuthType, KeyChange,
    RequestVerifier, Revocation, RevocationRequester, RolloverOperation, ACCT_PATH,
};
