//! Full verification path: TOML config, nonce server over TCP, account
//! cache and the request verifier.

mod common;

use prometheus::Registry;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

use common::Signer;
use portcullis_common::{AccountId, ProblemKind, SystemClock};
use portcullis_config::{Config, RedemptionConfig};
use portcullis_nonce::{derive_prefix, NonceMetrics, NonceRedemption, NonceServer, NonceService};
use portcullis_wfe::{
    AccountCache, GoodKeyPolicy, InboundRequest, MemoryAccountStore, Registration,
    RequestEvent, RequestVerifier,
};

const HOST: &str = "acme.test";
const ROUTING_KEY: &str = "end-to-end-routing-key";

const CONFIG: &str = r#"
[wfe]
max_request_size = 50000

[wfe.account_cache]
size = 100
ttl_seconds = 60

[key_policy]
allow_rsa = true
"#;

struct Harness {
    verifier: RequestVerifier,
    nonces: Arc<NonceService>,
    store: Arc<MemoryAccountStore>,
    account_key: Signer,
}

impl Harness {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let metrics = NonceMetrics::new(&Registry::new()).unwrap();
        let prefix = derive_prefix(&address, ROUTING_KEY.as_bytes());
        let nonces = Arc::new(NonceService::new(Some(prefix), 0, metrics).unwrap());
        let server = NonceServer::new(nonces.clone());
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        let mut config = Config::from_toml_str(CONFIG).unwrap();
        config.redemption = RedemptionConfig::Dynamic {
            hmac_key: ROUTING_KEY.to_string(),
            backends: vec![address],
            rpc_timeout_ms: 2000,
        };

        let account_key = Signer::rsa();
        let store = Arc::new(MemoryAccountStore::new());
        store.insert(Registration::new(AccountId::new(1), account_key.jwk()));

        let registry = Registry::new();
        let cache = AccountCache::from_config(
            store.clone(),
            &config.wfe.account_cache,
            Arc::new(SystemClock),
            &registry,
        )
        .unwrap();

        let verifier = RequestVerifier::new(
            Arc::new(cache),
            NonceRedemption::from_config(&config.redemption).unwrap(),
            Arc::new(GoodKeyPolicy::new(&config.key_policy)),
            &registry,
        )
        .unwrap()
        .with_config(&config.wfe);

        Self {
            verifier,
            nonces,
            store,
            account_key,
        }
    }

    fn url(path: &str) -> String {
        format!("https://{}{}", HOST, path)
    }

    fn kid() -> String {
        Self::url("/acme/acct/1")
    }

    fn signed(&self, url: &str, path: &str, payload: &[u8]) -> InboundRequest {
        let nonce = self.nonces.nonce().unwrap();
        let body = self
            .account_key
            .sign_jws(&self.account_key.kid_header(&Self::kid(), &nonce, url), payload);
        InboundRequest::jose_post(HOST, path, body).with_tls(true)
    }
}

#[tokio::test]
async fn test_signed_request_succeeds_once() {
    let h = Harness::start().await;
    let request = h.signed(&Harness::url("/acme/new-order"), "/acme/new-order", b"{}");

    let mut event = RequestEvent::new("POST", "/acme/new-order");
    let post = h.verifier.valid_post_for_account(&request, &mut event).await.unwrap();
    assert_eq!(post.account.id, AccountId::new(1));
    assert_eq!(event.requester, Some(AccountId::new(1)));

    let mut event = RequestEvent::new("POST", "/acme/new-order");
    let err = h
        .verifier
        .valid_post_for_account(&request, &mut event)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ProblemKind::BadNonce);
}

#[tokio::test]
async fn test_altered_url_rejected() {
    let h = Harness::start().await;
    let request = h.signed(&Harness::url("/acme/new-authz"), "/acme/new-order", b"{}");

    let mut event = RequestEvent::new("POST", "/acme/new-order");
    let err = h
        .verifier
        .valid_post_for_account(&request, &mut event)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ProblemKind::Malformed);
}

#[tokio::test]
async fn test_account_lookups_are_cached() {
    let h = Harness::start().await;
    for _ in 0..3 {
        let request = h.signed(&Harness::url("/acme/new-order"), "/acme/new-order", b"{}");
        let mut event = RequestEvent::new("POST", "/acme/new-order");
        h.verifier.valid_post_for_account(&request, &mut event).await.unwrap();
    }
    assert_eq!(h.store.lookups(), 1);
}

#[tokio::test]
async fn test_key_rollover_with_wrong_old_key() {
    let h = Harness::start().await;
    let new_key = Signer::p256();
    let key_change = Harness::url("/acme/key-change");

    let inner = new_key.sign_jws(
        &json!({"alg": new_key.alg(), "jwk": new_key.jwk(), "url": key_change}),
        json!({"account": Harness::kid(), "oldKey": Signer::p256().jwk()})
            .to_string()
            .as_bytes(),
    );
    let request = h.signed(&key_change, "/acme/key-change", &inner);

    let mut event = RequestEvent::new("POST", "/acme/key-change");
    let err = h.verifier.valid_key_change(&request, &mut event).await.unwrap_err();
    assert_eq!(err.kind, ProblemKind::Malformed);
    assert_eq!(
        err.detail,
        "Inner JWS does not contain old key field matching current account key"
    );
}

#[tokio::test]
async fn test_key_rollover_succeeds() {
    let h = Harness::start().await;
    let new_key = Signer::p256();
    let key_change = Harness::url("/acme/key-change");

    let inner = new_key.sign_jws(
        &json!({"alg": new_key.alg(), "jwk": new_key.jwk(), "url": key_change}),
        json!({"account": Harness::kid(), "oldKey": h.account_key.jwk()})
            .to_string()
            .as_bytes(),
    );
    let request = h.signed(&key_change, "/acme/key-change", &inner);

    let mut event = RequestEvent::new("POST", "/acme/key-change");
    let change = h.verifier.valid_key_change(&request, &mut event).await.unwrap();
    assert_eq!(change.operation.new_key, new_key.jwk());
    assert_eq!(change.account.id, AccountId::new(1));
}
