//! Shared per-client counter store.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, trace};

use super::clock::{Clock, SystemClock};
use super::decision::{decide, CounterEntry, Decision, Policy};
use super::key::ClientKey;
use crate::error::{FloodgateError, Result};

/// How many times a request re-fetches an entry that was evicted under it.
const MAX_EVICTION_RETRIES: usize = 4;

type Slot = Arc<Mutex<CounterEntry>>;

/// Concurrency-safe map from client key to its counter.
///
/// The map lock is held only long enough to fetch or create a key's slot;
/// the increment and check run under that slot's own mutex, so requests
/// for unrelated clients never wait on each other's decisions.
pub struct CounterStore {
    /// Counter slots indexed by client key
    entries: DashMap<ClientKey, Slot>,
    /// Policy shared by every key
    policy: Policy,
    /// Time source for window boundaries
    clock: Arc<dyn Clock>,
}

impl CounterStore {
    /// Create a store backed by the system clock.
    pub fn new(policy: Policy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(policy: Policy, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// The store's notion of the current time.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Record a request for `key` at the current time and decide on it.
    pub fn record_and_check(&self, key: &ClientKey) -> Result<Decision> {
        self.record_and_check_at(key, self.clock.now())
    }

    /// Record a request for `key` at `now` and decide on it.
    ///
    /// Fetch-or-create, stale reset, increment and decision happen as one
    /// step under the key's mutex. If the sweep evicted the entry between
    /// the fetch and the lock, the lookup is retried so the increment lands
    /// on the entry other callers will see.
    pub fn record_and_check_at(&self, key: &ClientKey, now: DateTime<Utc>) -> Result<Decision> {
        for _ in 0..MAX_EVICTION_RETRIES {
            let slot = self.slot(key, now);
            let mut entry = slot.lock();
            if entry.evicted {
                trace!(key = %key, "Entry evicted before lock, retrying");
                continue;
            }

            let decision = decide(&mut entry, now, &self.policy).map_err(|e| {
                error!(key = %key, error = %e, "Counter entry fault");
                e
            })?;

            trace!(
                key = %key,
                count = entry.count,
                allowed = decision.allowed,
                remaining = decision.remaining,
                "Admission decision"
            );
            return Ok(decision);
        }

        error!(key = %key, "Gave up after repeated evictions");
        Err(FloodgateError::Store(format!(
            "entry for {} kept being evicted",
            key
        )))
    }

    fn slot(&self, key: &ClientKey, now: DateTime<Utc>) -> Slot {
        if let Some(slot) = self.entries.get(key) {
            return Arc::clone(slot.value());
        }

        let slot = self.entries.entry(key.clone()).or_insert_with(|| {
            debug!(
                key = %key,
                limit = self.policy.limit(),
                window = ?self.policy.window(),
                "Creating new counter entry"
            );
            Arc::new(Mutex::new(CounterEntry::new(now)))
        });
        Arc::clone(slot.value())
    }

    /// Evict entries whose window closed more than one window before `now`.
    ///
    /// Candidates are found under shard read locks; each one is then removed
    /// on its own, so a shard's write lock is held only for a single removal.
    /// Entries locked by an in-flight request are left for the next pass.
    /// Returns the number of entries removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        self.expired_keys(now)
            .iter()
            .filter(|key| self.evict(key, now))
            .count()
    }

    fn expired_keys(&self, now: DateTime<Utc>) -> Vec<ClientKey> {
        self.entries
            .iter()
            .filter(|slot| {
                slot.value()
                    .try_lock()
                    .is_some_and(|entry| entry.is_expired(now, &self.policy))
            })
            .map(|slot| slot.key().clone())
            .collect()
    }

    /// Remove `key` if it is still expired and not in use.
    fn evict(&self, key: &ClientKey, now: DateTime<Utc>) -> bool {
        self.entries
            .remove_if(key, |_, slot| match slot.try_lock() {
                Some(mut entry) if entry.is_expired(now, &self.policy) => {
                    entry.evicted = true;
                    true
                }
                _ => false,
            })
            .is_some()
    }

    /// Run [`CounterStore::sweep`] against the store's clock.
    pub fn sweep_now(&self) -> usize {
        self.sweep(self.clock.now())
    }

    /// Requests counted so far in `key`'s current window.
    ///
    /// Returns `None` if no entry exists for the key.
    pub fn count_for(&self, key: &ClientKey) -> Option<u64> {
        self.entries.get(key).map(|slot| slot.lock().count)
    }

    /// Get the number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.entries.retain(|_, slot| {
            slot.lock().evicted = true;
            false
        });
    }
}
