//! Per-credential request accounting.
//!
//! Counters are plain atomics and snapshots sit behind short mutex
//! sections. Two workers may read a slightly stale count; the worst outcome
//! is a quota check that fires one request early or late.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::seq::SliceRandom;
use tracklink_core::RateLimit;

use crate::Credential;

/// Thresholds that drive quota refreshes and backoff.
#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    /// Re-read the remote quota whenever the local counter lands on a
    /// multiple of this value.
    pub refresh_every: u64,
    /// Above this count every request re-reads the remote quota.
    pub soft_limit: u64,
    /// Above this count the caller sleeps until the quota window resets.
    pub hard_limit: u64,
    /// Added to the reset time before waking up.
    pub reset_margin: Duration,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            refresh_every: 1000,
            soft_limit: 4900,
            hard_limit: 4950,
            reset_margin: Duration::from_secs(60),
        }
    }
}

impl QuotaPolicy {
    pub fn needs_refresh(&self, used: u64) -> bool {
        self.refresh_every > 0 && used % self.refresh_every == 0
    }

    pub fn over_soft_limit(&self, used: u64) -> bool {
        used > self.soft_limit
    }

    /// How long to wait before using a credential again, if at all.
    pub fn backoff(&self, used: u64, snapshot: &RateLimit, now: i64) -> Option<Duration> {
        if used <= self.hard_limit {
            return None;
        }
        let wake_at = snapshot.reset.saturating_add(self.reset_margin.as_secs() as i64);
        let wait = wake_at - now;
        (wait > 0).then(|| Duration::from_secs(wait as u64))
    }
}

pub(crate) struct CredentialUsage {
    pub(crate) credential: Credential,
    used: AtomicU64,
    snapshot: Mutex<RateLimit>,
}

impl CredentialUsage {
    fn new(credential: Credential) -> Self {
        Self {
            credential,
            used: AtomicU64::new(0),
            snapshot: Mutex::new(RateLimit::default()),
        }
    }

    pub(crate) fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    /// Count one request and return the new total.
    pub(crate) fn record(&self) -> u64 {
        self.used.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Store an authoritative snapshot and reconcile the local counter to it.
    pub(crate) fn reconcile(&self, limit: RateLimit) {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = limit;
        self.used.store(limit.used, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RateLimit {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Usage state for the whole credential pool.
pub(crate) struct UsageTable {
    entries: Vec<CredentialUsage>,
}

impl UsageTable {
    pub(crate) fn new(credentials: Vec<Credential>) -> Self {
        Self {
            entries: credentials.into_iter().map(CredentialUsage::new).collect(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Uniformly random entry; `None` only for an empty pool.
    pub(crate) fn pick(&self) -> Option<&CredentialUsage> {
        self.entries.choose(&mut rand::thread_rng())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &CredentialUsage> {
        self.entries.iter()
    }
}
