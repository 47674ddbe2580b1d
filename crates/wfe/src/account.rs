//! Account records and the read contract the verifier needs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};

use portcullis_common::{AccountId, ServiceError};

use crate::jwk::JsonWebKey;

/// Lifecycle status of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcmeStatus {
    Valid,
    Deactivated,
    Revoked,
}

impl AcmeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcmeStatus::Valid => "valid",
            AcmeStatus::Deactivated => "deactivated",
            AcmeStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for AcmeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ACME account as stored by the storage authority.
///
/// `Clone` is a deep copy; the cache hands out clones so callers can never
/// mutate a cached record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub id: AccountId,
    pub key: JsonWebKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<Vec<String>>,
    #[serde(default)]
    pub agreement: String,
    pub initial_ip: IpAddr,
    pub created_at: DateTime<Utc>,
    pub status: AcmeStatus,
}

impl Registration {
    /// A valid account with no contacts.
    pub fn new(id: AccountId, key: JsonWebKey) -> Self {
        Self {
            id,
            key,
            contact: None,
            agreement: String::new(),
            initial_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            created_at: Utc::now(),
            status: AcmeStatus::Valid,
        }
    }

    pub fn with_contact(mut self, contact: Vec<String>) -> Self {
        self.contact = Some(contact);
        self
    }

    pub fn with_status(mut self, status: AcmeStatus) -> Self {
        self.status = status;
        self
    }
}

/// Account lookup by id.
///
/// Missing accounts are `ServiceError::NotFound`; every other error is a
/// backend failure.
#[async_trait]
pub trait AccountGetter: Send + Sync {
    async fn get_registration(&self, id: AccountId) -> Result<Registration, ServiceError>;
}

/// In-memory account storage.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<AccountId, Registration>>,
    lookups: AtomicUsize,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, account: Registration) {
        self.accounts.write().insert(account.id, account);
    }

    pub fn remove(&self, id: AccountId) -> Option<Registration> {
        self.accounts.write().remove(&id)
    }

    /// Number of `get_registration` calls served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AccountGetter for MemoryAccountStore {
    async fn get_registration(&self, id: AccountId) -> Result<Registration, ServiceError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.accounts
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("no account with id {}", id)))
    }
}
