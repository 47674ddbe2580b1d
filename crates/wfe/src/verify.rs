//! JWS request verification.
//!
//! Every authenticated ACME POST passes through the same stages, in order:
//!
//! ```text
//! ValidPOST -> Parse -> AuthType -> ResolveKey -> CheckAlgorithm
//!           -> VerifySignature -> CheckNonce -> CheckURL -> BodyIsJSON
//! ```
//!
//! A stage that fails returns a [`ProblemDetails`] and increments the
//! matching `jose_errors` or `http_errors` counter; later stages never run.
//! The nonce is only redeemed after the signature verifies, so a forged
//! request cannot burn someone else's nonce.

use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use prometheus::Registry;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

use portcullis_common::{AccountId, ProblemDetails, ServiceError};
use portcullis_config::WfeConfig;
use portcullis_nonce::NonceRedemption;

use crate::account::{AccountGetter, AcmeStatus, Registration};
use crate::event::RequestEvent;
use crate::jwk::{public_keys_equal, JsonWebKey, SignatureAlgorithm};
use crate::jws::Jws;
use crate::keypolicy::KeyPolicy;
use crate::request::{InboundRequest, JOSE_CONTENT_TYPE};
use crate::stats::WfeStats;

/// Path under which account URLs live.
pub const ACCT_PATH: &str = "/acme/acct/";

const REPLAY_NONCE_HEADER: &str = "replay-nonce";

const WRONG_OLD_KEY: &str =
    "Inner JWS does not contain old key field matching current account key";

// ============================================================================
// Authentication type and algorithm binding
// ============================================================================

/// How a JWS identifies its signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwsAuthType {
    /// The protected header carries the public key (`jwk`).
    EmbeddedJwk,
    /// The protected header carries an account URL (`kid`).
    EmbeddedKeyId,
    /// Neither is present.
    Invalid,
}

/// Determine the auth type of `jws`. Carrying both `jwk` and `kid` is an
/// error; carrying neither is [`JwsAuthType::Invalid`].
pub fn check_jws_auth_type(jws: &Jws) -> Result<JwsAuthType, ProblemDetails> {
    let header = jws.header();
    match (header.key_id.is_some(), header.jwk.is_some()) {
        (true, true) => Err(ProblemDetails::malformed(
            "jwk and kid header fields are mutually exclusive",
        )),
        (true, false) => Ok(JwsAuthType::EmbeddedKeyId),
        (false, true) => Ok(JwsAuthType::EmbeddedJwk),
        (false, false) => Ok(JwsAuthType::Invalid),
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlgorithmError {
    #[error(
        "JWS signature header contains unsupported algorithm {0:?}, expected one of RS256, ES256, ES384 or ES512"
    )]
    Unsupported(String),

    #[error("JWK contains unsupported key type (expected RSA, or ECDSA P-256, P-384, or P-521")]
    UnsupportedKeyType,

    #[error("JWS signature header algorithm {header:?} does not match expected algorithm {expected:?} for JWK")]
    HeaderMismatch {
        header: String,
        expected: &'static str,
    },

    #[error("JWK key header algorithm {key:?} does not match expected algorithm {expected:?} for JWK")]
    KeyMismatch { key: String, expected: &'static str },
}

/// Check that the header algorithm is supported, is the one the key type
/// dictates, and agrees with the key's own `alg` hint when it has one.
pub fn check_algorithm(
    key: &JsonWebKey,
    jws: &Jws,
) -> Result<SignatureAlgorithm, AlgorithmError> {
    let header_alg = jws.header().algorithm.as_str();
    if SignatureAlgorithm::from_name(header_alg).is_none() {
        return Err(AlgorithmError::Unsupported(header_alg.to_string()));
    }

    let expected = key
        .key
        .signature_algorithm()
        .ok_or(AlgorithmError::UnsupportedKeyType)?;

    if header_alg != expected.as_str() {
        return Err(AlgorithmError::HeaderMismatch {
            header: header_alg.to_string(),
            expected: expected.as_str(),
        });
    }
    if let Some(hint) = key.algorithm.as_deref().filter(|alg| !alg.is_empty()) {
        if hint != expected.as_str() {
            return Err(AlgorithmError::KeyMismatch {
                key: hint.to_string(),
                expected: expected.as_str(),
            });
        }
    }
    Ok(expected)
}

// ============================================================================
// Results
// ============================================================================

/// A POST authenticated by an existing account.
#[derive(Debug, Clone)]
pub struct AccountPost {
    /// Verified payload; empty for POST-as-GET.
    pub payload: Vec<u8>,
    pub jws: Jws,
    pub account: Registration,
}

/// A verified request to replace `old_key` with `new_key`.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloverOperation {
    pub old_key: JsonWebKey,
    pub new_key: JsonWebKey,
    /// Account URL named inside the inner JWS.
    pub account: String,
}

/// Who is asking for a revocation.
#[derive(Debug, Clone, PartialEq)]
pub enum RevocationRequester {
    /// The request was signed by an account key.
    Account(Registration),
    /// The request was signed by the certificate's own key.
    CertificateKey(JsonWebKey),
}

#[derive(Debug, Clone)]
pub struct Revocation {
    pub payload: Vec<u8>,
    pub requester: RevocationRequester,
}

/// A fully checked key change: outer account POST plus inner rollover.
#[derive(Debug, Clone)]
pub struct KeyChange {
    pub account: Registration,
    pub operation: RolloverOperation,
}

#[derive(Deserialize)]
struct RolloverRequest {
    #[serde(rename = "oldKey", default)]
    old_key: Option<JsonWebKey>,
    #[serde(default)]
    account: String,
}

// ============================================================================
// Verifier
// ============================================================================

/// Authenticates ACME POST requests.
pub struct RequestVerifier {
    accounts: Arc<dyn AccountGetter>,
    nonces: NonceRedemption,
    key_policy: Arc<dyn KeyPolicy>,
    legacy_key_id_prefix: Option<String>,
    max_request_size: usize,
    stats: WfeStats,
}

impl RequestVerifier {
    /// Create a verifier with default limits. Counters are registered with
    /// `registry`.
    pub fn new(
        accounts: Arc<dyn AccountGetter>,
        nonces: NonceRedemption,
        key_policy: Arc<dyn KeyPolicy>,
        registry: &Registry,
    ) -> Result<Self, prometheus::Error> {
        let defaults = WfeConfig::default();
        Ok(Self {
            accounts,
            nonces,
            key_policy,
            legacy_key_id_prefix: defaults.legacy_key_id_prefix,
            max_request_size: defaults.max_request_size,
            stats: WfeStats::new(registry)?,
        })
    }

    /// Apply the request limits and legacy Key-ID prefix from `config`.
    pub fn with_config(mut self, config: &WfeConfig) -> Self {
        self.legacy_key_id_prefix = config
            .legacy_key_id_prefix
            .clone()
            .filter(|prefix| !prefix.is_empty());
        self.max_request_size = config.max_request_size;
        self
    }

    pub fn stats(&self) -> &WfeStats {
        &self.stats
    }

    fn jose_problem(&self, label: &'static str, problem: ProblemDetails) -> ProblemDetails {
        self.stats.jose_error(label);
        debug!(error_type = label, detail = %problem.detail, "Rejected JWS");
        problem
    }

    fn http_problem(&self, label: &'static str, problem: ProblemDetails) -> ProblemDetails {
        self.stats.http_error(label);
        debug!(error_type = label, detail = %problem.detail, "Rejected request");
        problem
    }

    // ------------------------------------------------------------------------
    // Request shape
    // ------------------------------------------------------------------------

    /// Check the headers and body presence of a signed POST.
    pub fn valid_post_request(&self, request: &InboundRequest) -> Result<(), ProblemDetails> {
        if !request.headers().contains_key(CONTENT_LENGTH) {
            return Err(self.http_problem(
                "ContentLengthRequired",
                ProblemDetails::content_length_required(),
            ));
        }

        match request.header_str(CONTENT_TYPE.as_str()) {
            None | Some("") => {
                return Err(self.http_problem(
                    "NoContentType",
                    ProblemDetails::invalid_content_type(format!(
                        "No Content-Type header on POST. Content-Type must be {:?}",
                        JOSE_CONTENT_TYPE
                    )),
                ));
            }
            Some(content_type) if content_type != JOSE_CONTENT_TYPE => {
                return Err(self.http_problem(
                    "WrongContentType",
                    ProblemDetails::invalid_content_type(format!(
                        "Invalid Content-Type header on POST. Content-Type must be {:?}",
                        JOSE_CONTENT_TYPE
                    )),
                ));
            }
            Some(_) => {}
        }

        if request.headers().contains_key(REPLAY_NONCE_HEADER) {
            return Err(self.http_problem(
                "ReplayNonceOutsideJWS",
                ProblemDetails::malformed(
                    "HTTP requests should NOT contain Replay-Nonce header. Use JWS nonce field",
                ),
            ));
        }

        if request.body().is_none() {
            return Err(self.http_problem("NoPOSTBody", ProblemDetails::malformed("No body on POST")));
        }
        Ok(())
    }

    /// Parse a JWS body, counting the reason for any rejection.
    pub fn parse_jws(&self, body: &[u8]) -> Result<Jws, ProblemDetails> {
        Jws::parse(body).map_err(|e| {
            if let crate::jws::JwsError::Parse(reason) = &e {
                trace!(reason = *reason, "JWS parse failure");
            }
            self.jose_problem(e.stat_label(), ProblemDetails::malformed(e.to_string()))
        })
    }

    /// Validate the POST and parse its body as a JWS.
    pub fn parse_jws_request(&self, request: &InboundRequest) -> Result<Jws, ProblemDetails> {
        self.valid_post_request(request)?;

        let Some(body) = request.body() else {
            return Err(self.http_problem("NoPOSTBody", ProblemDetails::malformed("No body on POST")));
        };
        if body.len() > self.max_request_size {
            return Err(self.http_problem(
                "BodyTooLarge",
                ProblemDetails::unauthorized("request body too large"),
            ));
        }

        self.parse_jws(body)
    }

    /// Require `expected` as the auth type of `jws`.
    pub fn enforce_jws_auth_type(
        &self,
        jws: &Jws,
        expected: JwsAuthType,
    ) -> Result<(), ProblemDetails> {
        let auth_type = check_jws_auth_type(jws)
            .map_err(|problem| self.jose_problem("JWSAuthTypeInvalid", problem))?;

        if auth_type != expected {
            let detail = match expected {
                JwsAuthType::EmbeddedKeyId => "No Key ID in JWS header",
                _ => "No embedded JWK in JWS header",
            };
            return Err(self.jose_problem("JWSAuthTypeWrong", ProblemDetails::malformed(detail)));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Nonce and URL binding
    // ------------------------------------------------------------------------

    /// Redeem the JWS nonce.
    pub async fn valid_nonce(&self, jws: &Jws) -> Result<(), ProblemDetails> {
        let nonce = jws.header().nonce.as_deref().unwrap_or_default();
        if nonce.is_empty() {
            return Err(self.jose_problem(
                "JWSMissingNonce",
                ProblemDetails::bad_nonce("JWS has no anti-replay nonce"),
            ));
        }

        let valid = if nonce.len() != self.nonces.expected_nonce_len() {
            trace!(len = nonce.len(), "Nonce has the wrong length");
            false
        } else {
            self.nonces.redeem(nonce).await.map_err(|e| {
                ProblemDetails::for_service_error(&ServiceError::from(e), "failed to redeem nonce")
            })?
        };

        if !valid {
            return Err(self.jose_problem(
                "JWSInvalidNonce",
                ProblemDetails::bad_nonce(format!(
                    "JWS has an invalid anti-replay nonce: {:?}",
                    nonce
                )),
            ));
        }
        Ok(())
    }

    /// Check the JWS `url` header against the URL the request was sent to.
    pub fn valid_post_url(&self, request: &InboundRequest, jws: &Jws) -> Result<(), ProblemDetails> {
        let header = jws.header();
        if header.extra.is_empty() {
            return Err(self.jose_problem(
                "JWSNoExtraHeaders",
                ProblemDetails::malformed("JWS header parameter 'url' required"),
            ));
        }

        let header_url = match header.url() {
            Some(url) if !url.is_empty() => url,
            _ => {
                return Err(self.jose_problem(
                    "JWSMissingURL",
                    ProblemDetails::malformed("JWS header parameter 'url' required"),
                ));
            }
        };

        let expected = request.expected_url();
        if expected != header_url {
            return Err(self.jose_problem(
                "JWSMismatchedURL",
                ProblemDetails::malformed(format!(
                    "JWS header parameter 'url' incorrect. Expected {:?} got {:?}",
                    expected, header_url
                )),
            ));
        }
        Ok(())
    }

    /// Require the outer and inner JWS of a key rollover to name the same URL.
    pub fn match_jws_urls(&self, outer: &Jws, inner: &Jws) -> Result<(), ProblemDetails> {
        let outer_url = match outer.header().url() {
            Some(url) if !url.is_empty() => url,
            _ => {
                return Err(self.jose_problem(
                    "KeyRolloverOuterJWSNoURL",
                    ProblemDetails::malformed("Outer JWS header parameter 'url' required"),
                ));
            }
        };
        let inner_url = match inner.header().url() {
            Some(url) if !url.is_empty() => url,
            _ => {
                return Err(self.jose_problem(
                    "KeyRolloverInnerJWSNoURL",
                    ProblemDetails::malformed("Inner JWS header parameter 'url' required"),
                ));
            }
        };

        if outer_url != inner_url {
            return Err(self.jose_problem(
                "KeyRolloverMismatchedURLs",
                ProblemDetails::malformed(format!(
                    "Outer JWS 'url' value {:?} does not match inner JWS 'url' value {:?}",
                    outer_url, inner_url
                )),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Key resolution
    // ------------------------------------------------------------------------

    /// The embedded JWK of a self-authenticated JWS.
    pub fn extract_jwk(&self, jws: &Jws) -> Result<JsonWebKey, ProblemDetails> {
        self.enforce_jws_auth_type(jws, JwsAuthType::EmbeddedJwk)?;

        let key = match &jws.header().jwk {
            Some(key) if key.valid() => key.clone(),
            _ => {
                return Err(self.jose_problem(
                    "JWKInvalid",
                    ProblemDetails::malformed("Invalid JWK in JWS header"),
                ));
            }
        };
        Ok(key)
    }

    /// Extract the account id from a Key-ID URL.
    pub fn account_id_from_url(
        &self,
        account_url: &str,
        request: &InboundRequest,
    ) -> Result<AccountId, ProblemDetails> {
        let expected_prefix = request.relative_endpoint(ACCT_PATH);

        let id = if let Some(rest) = account_url.strip_prefix(&expected_prefix) {
            rest
        } else if let Some(rest) = self
            .legacy_key_id_prefix
            .as_deref()
            .and_then(|prefix| account_url.strip_prefix(prefix))
        {
            rest
        } else {
            return Err(ProblemDetails::malformed(format!(
                "KeyID header contained an invalid account URL: {:?}",
                account_url
            )));
        };

        id.parse::<AccountId>().map_err(|_| {
            ProblemDetails::malformed(format!(
                "Malformed account ID in KeyID header URL: {:?}",
                account_url
            ))
        })
    }

    /// Resolve the account named by the JWS Key-ID.
    ///
    /// Records the requester and contacts on `event`.
    pub async fn lookup_jwk(
        &self,
        jws: &Jws,
        request: &InboundRequest,
        event: &mut RequestEvent,
    ) -> Result<Registration, ProblemDetails> {
        self.enforce_jws_auth_type(jws, JwsAuthType::EmbeddedKeyId)?;

        let account_url = jws.header().key_id.as_deref().unwrap_or_default();
        let id = self
            .account_id_from_url(account_url, request)
            .map_err(|problem| self.jose_problem("JWSInvalidKeyID", problem))?;

        let account = match self.accounts.get_registration(id).await {
            Ok(account) => account,
            Err(e) if e.is_not_found() => {
                return Err(self.jose_problem(
                    "JWSKeyIDNotFound",
                    ProblemDetails::account_does_not_exist(format!(
                        "Account {:?} not found",
                        account_url
                    )),
                ));
            }
            Err(e) => {
                event.add_error(format!("calling account getter: {}", e));
                return Err(self.jose_problem(
                    "JWSKeyIDLookupFailed",
                    ProblemDetails::for_service_error(
                        &e,
                        &format!("Error retrieving account {:?}", account_url),
                    ),
                ));
            }
        };

        if account.status != AcmeStatus::Valid {
            return Err(self.jose_problem(
                "JWSKeyIDAccountInvalid",
                ProblemDetails::unauthorized(format!(
                    "Account is not valid, has status {:?}",
                    account.status.as_str()
                )),
            ));
        }

        event.requester = Some(account.id);
        if let Some(contact) = &account.contact {
            event.contacts = contact.clone();
        }
        Ok(account)
    }

    // ------------------------------------------------------------------------
    // Signature verification
    // ------------------------------------------------------------------------

    /// Verify `jws` with `key`, then its nonce, URL and payload.
    pub async fn valid_jws_for_key(
        &self,
        jws: &Jws,
        key: &JsonWebKey,
        request: &InboundRequest,
    ) -> Result<Vec<u8>, ProblemDetails> {
        let algorithm = check_algorithm(key, jws).map_err(|e| {
            self.jose_problem(
                "JWSAlgorithmCheckFailed",
                ProblemDetails::bad_signature_algorithm(e.to_string()),
            )
        })?;

        let payload = jws.verify(key, algorithm).map_err(|e| {
            trace!(error = %e, "Signature check failed");
            self.jose_problem(
                "JWSVerifyFailed",
                ProblemDetails::malformed("JWS verification error"),
            )
        })?;

        self.valid_nonce(jws).await?;
        self.valid_post_url(request, jws)?;

        if !payload.is_empty()
            && serde_json::from_slice::<Option<Map<String, Value>>>(payload).is_err()
        {
            return Err(self.jose_problem(
                "JWSBodyUnmarshalFailed",
                ProblemDetails::malformed("Request payload did not parse as JSON"),
            ));
        }

        Ok(payload.to_vec())
    }

    /// Verify `jws` with the key of the account named by its Key-ID.
    pub async fn valid_jws_for_account(
        &self,
        jws: Jws,
        request: &InboundRequest,
        event: &mut RequestEvent,
    ) -> Result<AccountPost, ProblemDetails> {
        let account = self.lookup_jwk(&jws, request, event).await?;
        let payload = self.valid_jws_for_key(&jws, &account.key, request).await?;
        Ok(AccountPost {
            payload,
            jws,
            account,
        })
    }

    /// Authenticate a POST signed by an existing account.
    pub async fn valid_post_for_account(
        &self,
        request: &InboundRequest,
        event: &mut RequestEvent,
    ) -> Result<AccountPost, ProblemDetails> {
        let jws = self.parse_jws_request(request)?;
        self.valid_jws_for_account(jws, request, event).await
    }

    /// Authenticate a POST-as-GET: an account POST with an empty payload.
    pub async fn valid_post_as_get_for_account(
        &self,
        request: &InboundRequest,
        event: &mut RequestEvent,
    ) -> Result<Registration, ProblemDetails> {
        let post = self.valid_post_for_account(request, event).await?;
        if !post.payload.is_empty() {
            return Err(ProblemDetails::malformed(
                "POST-as-GET requests must have an empty payload",
            ));
        }
        event.method = "POST-as-GET".to_string();
        Ok(post.account)
    }

    /// Verify a JWS with the key embedded in it. Key policy is not applied.
    pub async fn valid_self_authenticated_jws(
        &self,
        jws: &Jws,
        request: &InboundRequest,
    ) -> Result<(Vec<u8>, JsonWebKey), ProblemDetails> {
        let key = self.extract_jwk(jws)?;
        let payload = self.valid_jws_for_key(jws, &key, request).await?;
        Ok((payload, key))
    }

    /// Authenticate a POST signed by its embedded key, enforcing key policy.
    pub async fn valid_self_authenticated_post(
        &self,
        request: &InboundRequest,
    ) -> Result<(Vec<u8>, JsonWebKey), ProblemDetails> {
        let jws = self.parse_jws_request(request)?;
        let (payload, key) = self.valid_self_authenticated_jws(&jws, request).await?;

        if let Err(e) = self.key_policy.good_key(&key) {
            return Err(self.jose_problem(
                "JWKRejectedByGoodKey",
                ProblemDetails::bad_public_key(e.to_string()),
            ));
        }
        Ok((payload, key))
    }

    /// Authenticate a revocation, which may be signed by an account key or
    /// by the certificate's own key.
    pub async fn valid_revocation_post(
        &self,
        request: &InboundRequest,
        event: &mut RequestEvent,
    ) -> Result<Revocation, ProblemDetails> {
        let jws = self.parse_jws_request(request)?;

        match check_jws_auth_type(&jws)? {
            JwsAuthType::EmbeddedKeyId => {
                let post = self.valid_jws_for_account(jws, request, event).await?;
                Ok(Revocation {
                    payload: post.payload,
                    requester: RevocationRequester::Account(post.account),
                })
            }
            JwsAuthType::EmbeddedJwk => {
                let (payload, key) = self.valid_self_authenticated_jws(&jws, request).await?;
                Ok(Revocation {
                    payload,
                    requester: RevocationRequester::CertificateKey(key),
                })
            }
            JwsAuthType::Invalid => Err(ProblemDetails::malformed(
                "Malformed JWS, no KeyID or embedded JWK",
            )),
        }
    }

    // ------------------------------------------------------------------------
    // Key rollover
    // ------------------------------------------------------------------------

    /// Check `inner` as a key rollover carried by the already verified
    /// `outer` JWS of the account currently holding `old_key`.
    pub fn valid_key_rollover(
        &self,
        outer: &Jws,
        inner: &Jws,
        old_key: &JsonWebKey,
    ) -> Result<RolloverOperation, ProblemDetails> {
        let new_key = self.extract_jwk(inner)?;

        if let Err(e) = self.key_policy.good_key(&new_key) {
            return Err(self.jose_problem(
                "KeyRolloverJWKRejectedByGoodKey",
                ProblemDetails::bad_public_key(e.to_string()),
            ));
        }

        let algorithm =
            check_algorithm(&new_key, inner).map_err(|e| ProblemDetails::malformed(e.to_string()))?;

        let inner_payload = inner.verify(&new_key, algorithm).map_err(|_| {
            self.jose_problem(
                "KeyRolloverJWSVerifyFailed",
                ProblemDetails::malformed("Inner JWS does not verify with embedded JWK"),
            )
        })?;

        self.match_jws_urls(outer, inner)?;

        let rollover: RolloverRequest = serde_json::from_slice(inner_payload).map_err(|_| {
            self.jose_problem(
                "KeyRolloverUnmarshalFailed",
                ProblemDetails::malformed(
                    "Inner JWS payload did not parse as JSON key rollover object",
                ),
            )
        })?;

        match &rollover.old_key {
            Some(claimed) if public_keys_equal(claimed, old_key) => {}
            _ => {
                return Err(self.jose_problem(
                    "KeyRolloverWrongOldKey",
                    ProblemDetails::malformed(WRONG_OLD_KEY),
                ));
            }
        }

        Ok(RolloverOperation {
            old_key: old_key.clone(),
            new_key,
            account: rollover.account,
        })
    }

    /// Authenticate a complete key change request.
    pub async fn valid_key_change(
        &self,
        request: &InboundRequest,
        event: &mut RequestEvent,
    ) -> Result<KeyChange, ProblemDetails> {
        let outer = self.valid_post_for_account(request, event).await?;
        let inner = self.parse_jws(&outer.payload)?;
        let operation = self.valid_key_rollover(&outer.jws, &inner, &outer.account.key)?;

        let key_id = outer.jws.header().key_id.as_deref().unwrap_or_default();
        if operation.account != key_id {
            return Err(self.jose_problem(
                "KeyRolloverMismatchedAccount",
                ProblemDetails::malformed(format!(
                    "Inner key rollover request specified Account {:?}, but outer JWS has Key ID {:?}",
                    operation.account, key_id
                )),
            ));
        }

        if public_keys_equal(&operation.new_key, &operation.old_key) {
            return Err(self.jose_problem(
                "KeyRolloverUnchangedKey",
                ProblemDetails::malformed(
                    "New key specified by rollover request is the same as the old key",
                ),
            ));
        }

        Ok(KeyChange {
            account: outer.account,
            operation,
        })
    }
}
