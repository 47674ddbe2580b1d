//! Single-use nonce issuance and redemption.
//!
//! A nonce is `prefix || base64url(iv_tail || AES-128-GCM(counter))`. The
//! counter comes from a monotonic high-water mark (`latest`); redemption
//! tracks which counters have been used inside a bounded window so memory
//! stays flat no matter how long the service runs.
//!
//! Each service instance owns exactly one prefix and one counter. Several
//! issuing replicas never share a prefix; the router sends each nonce back
//! to the instance that minted it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use ring::aead::{self, Aad, LessSafeKey, UnboundKey, AES_128_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;
use tracing::{debug, trace};

use portcullis_config::NonceServiceConfig;

use crate::errors::NonceError;
use crate::prefix::{derive_prefix, random_prefix, validate_prefix};

pub use portcullis_config::DEFAULT_MAX_USED;

/// Random bytes carried in the token and used as the low 8 bytes of the
/// 12-byte AEAD nonce.
const IV_TAIL_LEN: usize = 8;

const COUNTER_LEN: usize = 8;

/// Decoded length of the part after the prefix.
const DECODED_LEN: usize = IV_TAIL_LEN + COUNTER_LEN + 16;

/// Encoded length of the part after the prefix.
pub const ENCODED_BODY_LEN: usize = (DECODED_LEN * 4).div_ceil(3);

// ============================================================================
// Metrics
// ============================================================================

/// Counters for issuance and redemption outcomes, plus the latency of
/// evicting the oldest used counter.
#[derive(Clone)]
pub struct NonceMetrics {
    creates: IntCounter,
    redeems: IntCounterVec,
    heap_latency: Histogram,
}

impl NonceMetrics {
    /// Create counters and register them with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let creates = IntCounter::new("nonce_creates", "A counter of nonces generated")?;
        registry.register(Box::new(creates.clone()))?;

        let redeems = IntCounterVec::new(
            Opts::new("nonce_redeems", "A counter of nonce validations labelled by result"),
            &["result", "error"],
        )?;
        registry.register(Box::new(redeems.clone()))?;

        let heap_latency = Histogram::with_opts(HistogramOpts::new(
            "nonce_heap_latency",
            "A histogram of latencies of heap pop operations",
        ))?;
        registry.register(Box::new(heap_latency.clone()))?;

        Ok(Self {
            creates,
            redeems,
            heap_latency,
        })
    }

    fn redeemed(&self, outcome: Result<(), Rejection>) {
        let (result, error) = match outcome {
            Ok(()) => ("valid", ""),
            Err(reason) => ("invalid", reason.label()),
        };
        self.redeems.with_label_values(&[result, error]).inc();
    }
}

/// Why a nonce was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Prefix,
    Decode,
    Length,
    Decrypt,
    TooHigh,
    TooLow,
    TooOld,
    AlreadyUsed,
}

impl Rejection {
    fn label(&self) -> &'static str {
        match self {
            Rejection::Prefix => "prefix",
            Rejection::Decode => "decode",
            Rejection::Length => "length",
            Rejection::Decrypt => "decrypt",
            Rejection::TooHigh => "too_high",
            Rejection::TooLow => "too_low",
            Rejection::TooOld => "too_old",
            Rejection::AlreadyUsed => "already_used",
        }
    }
}

// ============================================================================
// Service
// ============================================================================

#[derive(Debug, Default)]
struct CounterState {
    /// Highest counter issued so far.
    latest: u64,
    /// Counters at or below this mark are rejected.
    earliest: u64,
    used: HashSet<u64>,
    used_heap: BinaryHeap<Reverse<u64>>,
}

/// Issues and redeems single-use nonces.
///
/// Thread-safe: all counter state sits behind one mutex, so two concurrent
/// redemptions of the same nonce resolve to exactly one winner.
pub struct NonceService {
    key: LessSafeKey,
    rng: SystemRandom,
    prefix: String,
    max_used: usize,
    state: Mutex<CounterState>,
    metrics: NonceMetrics,
}

impl NonceService {
    /// Create a service.
    ///
    /// `prefix` must be 4 or 8 base64url characters; `None` picks a random
    /// prefix. A `max_used` of zero selects [`DEFAULT_MAX_USED`].
    pub fn new(
        prefix: Option<String>,
        max_used: usize,
        metrics: NonceMetrics,
    ) -> Result<Self, NonceError> {
        let rng = SystemRandom::new();

        let prefix = match prefix {
            Some(prefix) => {
                validate_prefix(&prefix)?;
                prefix
            }
            None => random_prefix(&rng)?,
        };

        let mut key_bytes = [0u8; 16];
        rng.fill(&mut key_bytes).map_err(|_| NonceError::Rng)?;
        let key = UnboundKey::new(&AES_128_GCM, &key_bytes).map_err(|_| NonceError::Key)?;

        let max_used = if max_used == 0 {
            DEFAULT_MAX_USED
        } else {
            max_used
        };

        debug!(prefix = %prefix, max_used = max_used, "Nonce service created");

        Ok(Self {
            key: LessSafeKey::new(key),
            rng,
            prefix,
            max_used,
            state: Mutex::new(CounterState::default()),
            metrics,
        })
    }

    /// Create a service from configuration.
    ///
    /// An explicit prefix wins; otherwise a `prefix_key` derives the prefix
    /// from the listen address, which is what a prefix-aware router expects.
    pub fn from_config(
        config: &NonceServiceConfig,
        metrics: NonceMetrics,
    ) -> Result<Self, NonceError> {
        let prefix = match (&config.prefix, &config.prefix_key) {
            (Some(prefix), _) => Some(prefix.clone()),
            (None, Some(key)) => Some(derive_prefix(&config.listen_address, key.as_bytes())),
            (None, None) => None,
        };
        Self::new(prefix, config.max_used, metrics)
    }

    /// The prefix embedded in every nonce from this service.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn max_used(&self) -> usize {
        self.max_used
    }

    /// Issue a fresh nonce.
    pub fn nonce(&self) -> Result<String, NonceError> {
        let counter = {
            let mut state = self.state.lock();
            state.latest = state
                .latest
                .checked_add(1)
                .ok_or(NonceError::CounterExhausted)?;
            state.latest
        };

        let token = self.encrypt(counter)?;
        self.metrics.creates.inc();
        trace!(counter = counter, "Issued nonce");
        Ok(token)
    }

    /// Redeem a nonce. Returns `true` at most once per issued nonce.
    pub fn valid(&self, token: &str) -> bool {
        let outcome = self
            .decrypt(token)
            .and_then(|counter| self.redeem_counter(counter));

        if let Err(reason) = outcome {
            trace!(reason = reason.label(), "Rejected nonce");
        }
        self.metrics.redeemed(outcome);
        outcome.is_ok()
    }

    fn redeem_counter(&self, counter: u64) -> Result<(), Rejection> {
        let mut state = self.state.lock();

        if counter > state.latest {
            return Err(Rejection::TooHigh);
        }
        if counter <= state.earliest {
            return Err(Rejection::TooLow);
        }
        if state.latest - counter > self.max_used as u64 {
            return Err(Rejection::TooOld);
        }
        if !state.used.insert(counter) {
            return Err(Rejection::AlreadyUsed);
        }
        state.used_heap.push(Reverse(counter));

        if state.used.len() > self.max_used {
            let started = Instant::now();
            if let Some(Reverse(lowest)) = state.used_heap.pop() {
                state.used.remove(&lowest);
                state.earliest = lowest;
            }
            self.metrics
                .heap_latency
                .observe(started.elapsed().as_secs_f64());
        }

        // Drop bookkeeping for counters that fell out of the issuance window.
        let floor = state.latest.saturating_sub(self.max_used as u64);
        while let Some(&Reverse(lowest)) = state.used_heap.peek() {
            if lowest >= floor {
                break;
            }
            state.used_heap.pop();
            state.used.remove(&lowest);
        }

        Ok(())
    }

    fn encrypt(&self, counter: u64) -> Result<String, NonceError> {
        let mut tail = [0u8; IV_TAIL_LEN];
        self.rng.fill(&mut tail).map_err(|_| NonceError::Rng)?;

        let mut iv = [0u8; NONCE_LEN];
        iv[NONCE_LEN - IV_TAIL_LEN..].copy_from_slice(&tail);

        let mut sealed = counter.to_be_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                aead::Nonce::assume_unique_for_key(iv),
                Aad::empty(),
                &mut sealed,
            )
            .map_err(|_| NonceError::Encryption)?;

        let mut raw = Vec::with_capacity(DECODED_LEN);
        raw.extend_from_slice(&tail);
        raw.extend_from_slice(&sealed);

        Ok(format!("{}{}", self.prefix, URL_SAFE_NO_PAD.encode(raw)))
    }

    fn decrypt(&self, token: &str) -> Result<u64, Rejection> {
        let body = token
            .strip_prefix(self.prefix.as_str())
            .ok_or(Rejection::Prefix)?;

        let raw = URL_SAFE_NO_PAD.decode(body).map_err(|_| Rejection::Decode)?;
        if raw.len() != DECODED_LEN {
            return Err(Rejection::Length);
        }

        let (tail, sealed) = raw.split_at(IV_TAIL_LEN);
        let mut iv = [0u8; NONCE_LEN];
        iv[NONCE_LEN - IV_TAIL_LEN..].copy_from_slice(tail);

        let mut buf = sealed.to_vec();
        let plain = self
            .key
            .open_in_place(aead::Nonce::assume_unique_for_key(iv), Aad::empty(), &mut buf)
            .map_err(|_| Rejection::Decrypt)?;

        let bytes: [u8; COUNTER_LEN] = plain.try_into().map_err(|_| Rejection::Length)?;
        Ok(u64::from_be_bytes(bytes))
    }
}

impl std::fmt::Debug for NonceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceService")
            .field("prefix", &self.prefix)
            .field("max_used", &self.max_used)
            .finish_non_exhaustive()
    }
}
