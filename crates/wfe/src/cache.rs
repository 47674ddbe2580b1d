//! Read-through account cache.
//!
//! Bounded LRU with a fixed time-to-live per entry. Entries expire lazily:
//! an expired entry is dropped when it is next looked up. The lock is never
//! held across the backend call, so two concurrent misses for the same id
//! may both reach the backend; the later insert wins.

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use prometheus::{IntCounterVec, Opts, Registry};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

use portcullis_common::{AccountId, Clock, ServiceError};
use portcullis_config::AccountCacheConfig;

use crate::account::{AccountGetter, Registration};

struct CacheEntry {
    account: Registration,
    expires: Instant,
}

enum Cached {
    Hit(Registration),
    Expired,
    Miss,
}

/// Caches [`AccountGetter`] results for a short time.
pub struct AccountCache {
    inner: Arc<dyn AccountGetter>,
    cache: Mutex<LruCache<AccountId, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    lookups: IntCounterVec,
}

impl AccountCache {
    /// Create a cache of at most `size` accounts. A `size` of zero is
    /// treated as one.
    pub fn new(
        inner: Arc<dyn AccountGetter>,
        size: usize,
        ttl: Duration,
        clock: Arc<dyn Clock>,
        registry: &Registry,
    ) -> Result<Self, prometheus::Error> {
        let lookups = IntCounterVec::new(
            Opts::new(
                "account_cache_lookups",
                "Account cache lookups labelled by hit, miss or expired",
            ),
            &["result"],
        )?;
        registry.register(Box::new(lookups.clone()))?;

        Ok(Self {
            inner,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
            clock,
            lookups,
        })
    }

    pub fn from_config(
        inner: Arc<dyn AccountGetter>,
        config: &AccountCacheConfig,
        clock: Arc<dyn Clock>,
        registry: &Registry,
    ) -> Result<Self, prometheus::Error> {
        Self::new(inner, config.size, config.ttl(), clock, registry)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    /// Lookups recorded under `result` (`hit`, `miss` or `expired`).
    pub fn lookup_count(&self, result: &str) -> u64 {
        self.lookups.with_label_values(&[result]).get()
    }

    fn cached(&self, id: AccountId) -> Result<Option<Registration>, ServiceError> {
        let now = self.clock.now();
        let mut cache = self.cache.lock();

        let cached = match cache.get(&id) {
            Some(entry) if now < entry.expires => Cached::Hit(entry.account.clone()),
            Some(_) => Cached::Expired,
            None => Cached::Miss,
        };

        match cached {
            Cached::Hit(account) => {
                if account.id != id {
                    cache.pop(&id);
                    warn!(requested = %id, cached = %account.id, "Cached account id mismatch");
                    return Err(ServiceError::Internal(
                        "cached account id mismatch".to_string(),
                    ));
                }
                self.lookups.with_label_values(&["hit"]).inc();
                Ok(Some(account))
            }
            Cached::Expired => {
                cache.pop(&id);
                self.lookups.with_label_values(&["expired"]).inc();
                Ok(None)
            }
            Cached::Miss => {
                self.lookups.with_label_values(&["miss"]).inc();
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl AccountGetter for AccountCache {
    async fn get_registration(&self, id: AccountId) -> Result<Registration, ServiceError> {
        if let Some(account) = self.cached(id)? {
            trace!(account = %id, "Account cache hit");
            return Ok(account);
        }

        let account = self.inner.get_registration(id).await?;
        if account.id != id {
            warn!(requested = %id, returned = %account.id, "Backend returned wrong account");
            return Err(ServiceError::Internal(
                "backend returned account id mismatch".to_string(),
            ));
        }

        let expires = self.clock.now() + self.ttl;
        self.cache.lock().put(
            id,
            CacheEntry {
                account: account.clone(),
                expires,
            },
        );
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AcmeStatus, MemoryAccountStore};
    use crate::testing;
    use portcullis_common::FakeClock;

    const TTL: Duration = Duration::from_secs(5);

    struct Fixture {
        store: Arc<MemoryAccountStore>,
        clock: Arc<FakeClock>,
        cache: AccountCache,
    }

    fn fixture(size: usize) -> Fixture {
        let store = Arc::new(MemoryAccountStore::new());
        let clock = Arc::new(FakeClock::new());
        let cache = AccountCache::new(store.clone(), size, TTL, clock.clone(), &Registry::new())
            .unwrap();
        Fixture { store, clock, cache }
    }

    fn account(id: i64) -> Registration {
        Registration::new(AccountId::new(id), testing::rsa_key().jwk())
    }

    /// Returns an account whose id differs from the one asked for.
    struct WrongIdGetter;

    #[async_trait]
    impl AccountGetter for WrongIdGetter {
        async fn get_registration(&self, id: AccountId) -> Result<Registration, ServiceError> {
            Ok(account(id.get() + 1))
        }
    }

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let f = fixture(10);
        f.store.insert(account(1));

        let first = f.cache.get_registration(AccountId::new(1)).await.unwrap();
        f.clock.advance(Duration::from_secs(4));
        let second = f.cache.get_registration(AccountId::new(1)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.store.lookups(), 1);
        assert_eq!(f.cache.lookup_count("miss"), 1);
        assert_eq!(f.cache.lookup_count("hit"), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_refetched() {
        let f = fixture(10);
        f.store.insert(account(1));

        f.cache.get_registration(AccountId::new(1)).await.unwrap();
        f.clock.advance(TTL);
        f.store.insert(account(1).with_status(AcmeStatus::Deactivated));

        let refreshed = f.cache.get_registration(AccountId::new(1)).await.unwrap();
        assert_eq!(refreshed.status, AcmeStatus::Deactivated);
        assert_eq!(f.store.lookups(), 2);
        assert_eq!(f.cache.lookup_count("expired"), 1);
    }

    #[tokio::test]
    async fn test_returned_accounts_are_copies() {
        let f = fixture(10);
        f.store.insert(account(1));

        let mut first = f.cache.get_registration(AccountId::new(1)).await.unwrap();
        first.status = AcmeStatus::Revoked;
        first.contact = Some(vec!["mailto:evil@example.com".to_string()]);

        let second = f.cache.get_registration(AccountId::new(1)).await.unwrap();
        assert_eq!(second.status, AcmeStatus::Valid);
        assert_eq!(second.contact, None);
    }

    #[tokio::test]
    async fn test_not_found_propagates_uncached() {
        let f = fixture(10);

        let err = f.cache.get_registration(AccountId::new(404)).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(f.cache.is_empty());

        f.store.insert(account(404));
        assert!(f.cache.get_registration(AccountId::new(404)).await.is_ok());
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let f = fixture(2);
        for id in 1..=3 {
            f.store.insert(account(id));
            f.cache.get_registration(AccountId::new(id)).await.unwrap();
        }
        assert_eq!(f.cache.len(), 2);

        // Account 1 was least recently used and must come from the store.
        f.cache.get_registration(AccountId::new(1)).await.unwrap();
        assert_eq!(f.store.lookups(), 4);
    }

    #[tokio::test]
    async fn test_backend_id_mismatch() {
        let cache = AccountCache::new(
            Arc::new(WrongIdGetter),
            10,
            TTL,
            Arc::new(FakeClock::new()),
            &Registry::new(),
        )
        .unwrap();

        let err = cache.get_registration(AccountId::new(1)).await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::Internal("backend returned account id mismatch".to_string())
        );
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cached_id_mismatch_evicts() {
        let f = fixture(10);
        f.cache.cache.lock().put(
            AccountId::new(1),
            CacheEntry {
                account: account(2),
                expires: f.clock.now() + TTL,
            },
        );

        let err = f.cache.get_registration(AccountId::new(1)).await.unwrap_err();
        assert_eq!(err, ServiceError::Internal("cached account id mismatch".to_string()));
        assert!(f.cache.is_empty());
    }

    #[test]
    fn test_zero_size_still_caches() {
        let f = fixture(0);
        assert_eq!(f.cache.cache.lock().cap().get(), 1);
    }
}
