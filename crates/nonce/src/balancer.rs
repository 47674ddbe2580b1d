//! Prefix-aware backend selection for nonce redemption.
//!
//! A nonce can only be redeemed by the backend that issued it. Each backend
//! derives its prefix from its own address and a shared HMAC key, so the
//! router can recompute `prefix -> backend` from the backend addresses
//! alone.
//!
//! The moving parts:
//!
//! - [`Backend`]: one redemption connection plus its readiness state
//! - [`PickerBuilder`]: builds a [`Picker`] from the ready backends
//! - [`NoncePicker`]: matches a nonce prefix to a backend
//! - [`BalancedRedeemer`]: owns the backend set, swaps pickers whenever the
//!   set changes, and forwards each redemption to the picked backend

use arc_swap::ArcSwap;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::errors::{PickError, RpcError};
use crate::prefix::derive_prefix;
use crate::protocol::ValidMessage;
use crate::redeem::{RedeemRequest, Redeemer, RoutingHints};

// State constants for AtomicU8
const STATE_IDLE: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_READY: u8 = 2;
const STATE_TRANSIENT_FAILURE: u8 = 3;
const STATE_SHUTDOWN: u8 = 4;

/// Connectivity state of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    /// Removed from the backend set.
    Shutdown,
}

impl BackendState {
    fn to_u8(self) -> u8 {
        match self {
            BackendState::Idle => STATE_IDLE,
            BackendState::Connecting => STATE_CONNECTING,
            BackendState::Ready => STATE_READY,
            BackendState::TransientFailure => STATE_TRANSIENT_FAILURE,
            BackendState::Shutdown => STATE_SHUTDOWN,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            STATE_IDLE => BackendState::Idle,
            STATE_CONNECTING => BackendState::Connecting,
            STATE_READY => BackendState::Ready,
            STATE_TRANSIENT_FAILURE => BackendState::TransientFailure,
            _ => BackendState::Shutdown,
        }
    }
}

// ============================================================================
// Backend
// ============================================================================

struct BackendInner {
    address: String,
    redeemer: Arc<dyn Redeemer>,
    state: AtomicU8,
}

/// A redemption backend. Cloning shares the same connection and state.
#[derive(Clone)]
pub struct Backend {
    inner: Arc<BackendInner>,
}

impl Backend {
    /// Create a ready backend.
    pub fn new(address: impl Into<String>, redeemer: Arc<dyn Redeemer>) -> Self {
        Self {
            inner: Arc::new(BackendInner {
                address: address.into(),
                redeemer,
                state: AtomicU8::new(STATE_READY),
            }),
        }
    }

    /// The address the backend's prefix is derived from.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn redeemer(&self) -> &Arc<dyn Redeemer> {
        &self.inner.redeemer
    }

    pub fn state(&self) -> BackendState {
        BackendState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: BackendState) {
        self.inner.state.store(state.to_u8(), Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.state() == BackendState::Ready
    }

    fn same_as(&self, other: &Backend) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("address", &self.inner.address)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Picker
// ============================================================================

/// Chooses a backend for one redemption.
pub trait Picker: Send + Sync {
    fn pick(&self, hints: &RoutingHints) -> Result<Backend, PickError>;
}

/// Builds a [`Picker`] over the currently ready backends.
pub trait PickerBuilder: Send + Sync {
    fn build(&self, ready: Vec<Backend>) -> Box<dyn Picker>;
}

/// Builder for [`NoncePicker`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NoncePickerBuilder;

impl PickerBuilder for NoncePickerBuilder {
    fn build(&self, ready: Vec<Backend>) -> Box<dyn Picker> {
        debug!(backends = ready.len(), "Building nonce picker");
        Box::new(NoncePicker::new(ready))
    }
}

/// Routes by exact match of the nonce prefix against prefixes derived from
/// backend addresses.
///
/// The prefix table is computed on the first pick, with the HMAC key that
/// pick carries, and kept for the lifetime of the picker. A changed backend
/// set produces a new picker rather than a mutated table.
pub struct NoncePicker {
    backends: Vec<Backend>,
    table: OnceCell<HashMap<String, Backend>>,
}

impl NoncePicker {
    pub fn new(backends: Vec<Backend>) -> Self {
        Self {
            backends,
            table: OnceCell::new(),
        }
    }

    fn build_table(&self, hmac_key: &str) -> HashMap<String, Backend> {
        let table: HashMap<_, _> = self
            .backends
            .iter()
            .map(|backend| {
                (
                    derive_prefix(backend.address(), hmac_key.as_bytes()),
                    backend.clone(),
                )
            })
            .collect();
        trace!(entries = table.len(), "Built nonce prefix table");
        table
    }
}

impl Picker for NoncePicker {
    fn pick(&self, hints: &RoutingHints) -> Result<Backend, PickError> {
        if self.backends.is_empty() {
            return Err(PickError::NoBackendAvailable);
        }

        let (prefix, hmac_key) = hints.validate()?;
        let table = self.table.get_or_init(|| self.build_table(hmac_key));

        match table.get(prefix) {
            Some(backend) if backend.is_ready() => Ok(backend.clone()),
            Some(backend) => {
                debug!(
                    prefix = %prefix,
                    address = %backend.address(),
                    state = ?backend.state(),
                    "Backend for nonce prefix is no longer ready"
                );
                Err(PickError::NoBackendAvailable)
            }
            None => {
                trace!(prefix = %prefix, "No backend matches nonce prefix");
                Err(PickError::NoBackendAvailable)
            }
        }
    }
}

// ============================================================================
// Balanced redeemer
// ============================================================================

/// A [`Redeemer`] that forwards each call to the backend owning the nonce's
/// prefix.
pub struct BalancedRedeemer {
    builder: Arc<dyn PickerBuilder>,
    backends: Mutex<Vec<Backend>>,
    picker: ArcSwap<Box<dyn Picker>>,
}

impl BalancedRedeemer {
    /// Create a redeemer with no backends.
    pub fn new(builder: Arc<dyn PickerBuilder>) -> Self {
        let picker = builder.build(Vec::new());
        Self {
            builder,
            backends: Mutex::new(Vec::new()),
            picker: ArcSwap::from_pointee(picker),
        }
    }

    /// Create a redeemer using [`NoncePickerBuilder`] over `backends`.
    pub fn with_backends(backends: Vec<Backend>) -> Self {
        let redeemer = Self::new(Arc::new(NoncePickerBuilder));
        redeemer.update_backends(backends);
        redeemer
    }

    /// Replace the backend set.
    ///
    /// Backends absent from the new set are marked shut down, so a picker
    /// that still holds them treats them as unmatched.
    pub fn update_backends(&self, backends: Vec<Backend>) {
        let mut current = self.backends.lock();
        for old in current.iter() {
            if !backends.iter().any(|b| b.same_as(old)) {
                old.set_state(BackendState::Shutdown);
                info!(address = %old.address(), "Nonce backend removed");
            }
        }
        *current = backends;
        self.rebuild(&current);
    }

    /// Rebuild the picker after a backend changed state.
    pub fn backend_state_changed(&self) {
        let current = self.backends.lock();
        self.rebuild(&current);
    }

    pub fn backends(&self) -> Vec<Backend> {
        self.backends.lock().clone()
    }

    fn rebuild(&self, backends: &[Backend]) {
        let ready: Vec<Backend> = backends.iter().filter(|b| b.is_ready()).cloned().collect();
        if ready.is_empty() {
            warn!(
                configured = backends.len(),
                "No ready nonce backends, redemption will fail"
            );
        }
        self.picker.store(Arc::new(self.builder.build(ready)));
    }

    /// Choose the backend for a call with the current picker.
    pub fn pick(&self, hints: &RoutingHints) -> Result<Backend, PickError> {
        self.picker.load().pick(hints)
    }
}

#[async_trait]
impl Redeemer for BalancedRedeemer {
    async fn redeem(&self, request: RedeemRequest) -> Result<ValidMessage, RpcError> {
        let backend = self.pick(&request.hints)?;
        trace!(address = %backend.address(), "Routing nonce redemption");
        backend.redeemer().redeem(request).await
    }
}
