//! Bounded memoization cache.
//!
//! `CommonCache` maps a deterministic input to the result of an expensive
//! pure computation. It is bounded two ways:
//! - **capacity**: the least-recently-used entry is evicted once more than
//!   `capacity` values are held;
//! - **idle timeout**: an entry not read within the timeout is dropped the
//!   next time the cache is touched.
//!
//! `get` computes at most once per absent key: concurrent callers for the
//! same key block until the single computation finishes and all observe its
//! value, or its failure. The outcome is handed to the waiters of that one
//! computation directly, so they see it even when the value is not kept
//! (invalidated mid-compute, or evicted at once). Failures are never
//! stored, so the next `get` retries.
//!
//! Recency is an explicit `BTreeMap<tick, key>`; eviction and expiry walk it
//! from the front and are fully deterministic under an injected [`Clock`].

use ahash::AHashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::error::Error;

// ============================================================================
// Clocks
// ============================================================================

/// Monotonic time source, as an offset from an arbitrary origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to.
#[derive(Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

// ============================================================================
// State
// ============================================================================

enum Slot<V> {
    Ready {
        value: V,
        tick: u64,
        last_access: Duration,
    },
    Computing {
        epoch: u64,
        waiters: usize,
        /// Invalidated mid-compute: hand the result out, don't keep it.
        stale: bool,
    },
}

struct State<K, V, E> {
    slots: AHashMap<K, Slot<V>>,
    /// Access order of ready entries, oldest first.
    lru: BTreeMap<u64, K>,
    /// Finished computations still owed to their waiters.
    outcomes: AHashMap<u64, (Result<V, E>, usize)>,
    ticks: u64,
    epochs: u64,
    ready_len: usize,
}

impl<K: Eq + Hash + Clone, V: Clone, E: Clone> State<K, V, E> {
    fn new() -> Self {
        Self {
            slots: AHashMap::new(),
            lru: BTreeMap::new(),
            outcomes: AHashMap::new(),
            ticks: 0,
            epochs: 0,
            ready_len: 0,
        }
    }

    fn touch(&mut self, key: &K, now: Duration) -> Option<V> {
        self.ticks += 1;
        let fresh = self.ticks;
        let Some(Slot::Ready {
            value,
            tick,
            last_access,
        }) = self.slots.get_mut(key)
        else {
            return None;
        };
        let previous = std::mem::replace(tick, fresh);
        *last_access = now;
        let value = value.clone();
        self.lru.remove(&previous);
        self.lru.insert(fresh, key.clone());
        Some(value)
    }

    fn insert_ready(&mut self, key: K, value: V, now: Duration, capacity: usize) {
        self.ticks += 1;
        let tick = self.ticks;
        match self.slots.insert(
            key.clone(),
            Slot::Ready {
                value,
                tick,
                last_access: now,
            },
        ) {
            Some(Slot::Ready { tick: old, .. }) => {
                self.lru.remove(&old);
            }
            _ => self.ready_len += 1,
        }
        self.lru.insert(tick, key);
        while self.ready_len > capacity {
            let Some((_, oldest)) = self.lru.pop_first() else {
                break;
            };
            self.slots.remove(&oldest);
            self.ready_len -= 1;
        }
    }

    fn remove_ready(&mut self, key: &K) {
        if let Some(Slot::Ready { tick, .. }) = self.slots.get(key) {
            let tick = *tick;
            self.slots.remove(key);
            self.lru.remove(&tick);
            self.ready_len -= 1;
        }
    }

    fn purge_idle(&mut self, now: Duration, timeout: Duration) {
        while let Some((&tick, key)) = self.lru.first_key_value() {
            match self.slots.get(key) {
                Some(Slot::Ready { last_access, .. }) if *last_access + timeout > now => break,
                Some(Slot::Ready { .. }) => {
                    let key = key.clone();
                    self.remove_ready(&key);
                }
                _ => {
                    self.lru.remove(&tick);
                }
            }
        }
    }

    fn begin(&mut self, key: K) -> u64 {
        self.epochs += 1;
        let epoch = self.epochs;
        self.slots.insert(
            key,
            Slot::Computing {
                epoch,
                waiters: 0,
                stale: false,
            },
        );
        epoch
    }

    fn take_computing(&mut self, key: &K, epoch: u64) -> Option<(usize, bool)> {
        match self.slots.get(key) {
            Some(Slot::Computing { epoch: e, .. }) if *e == epoch => {}
            _ => return None,
        }
        match self.slots.remove(key) {
            Some(Slot::Computing { waiters, stale, .. }) => Some((waiters, stale)),
            _ => None,
        }
    }

    fn take_outcome(&mut self, epoch: u64) -> Option<Result<V, E>> {
        let (outcome, remaining) = self.outcomes.get_mut(&epoch)?;
        let outcome = outcome.clone();
        *remaining -= 1;
        if *remaining == 0 {
            self.outcomes.remove(&epoch);
        }
        Some(outcome)
    }
}

// ============================================================================
// CommonCache
// ============================================================================

pub struct CommonCache<K, V, E = Error> {
    state: Mutex<State<K, V, E>>,
    done: Condvar,
    capacity: usize,
    idle_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V, E> CommonCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(
            config.capacity,
            config.idle_timeout(),
            Arc::new(SystemClock::default()),
        )
    }

    pub fn with_clock(capacity: usize, idle_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::new()),
            done: Condvar::new(),
            capacity,
            idle_timeout,
            clock,
        }
    }

    /// Return the cached value for `key`, computing it if absent.
    ///
    /// Blocks while another thread computes the same key.
    pub fn get<F>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce(&K) -> Result<V, E>,
    {
        let mut state = self.state.lock();
        let mut registered: Option<u64> = None;
        loop {
            if let Some(epoch) = registered {
                if let Some(outcome) = state.take_outcome(epoch) {
                    return outcome;
                }
            }
            let now = self.clock.now();
            state.purge_idle(now, self.idle_timeout);
            if let Some(value) = state.touch(&key, now) {
                return Ok(value);
            }
            match state.slots.get_mut(&key) {
                Some(Slot::Computing { epoch, waiters, .. }) => {
                    if registered != Some(*epoch) {
                        *waiters += 1;
                        registered = Some(*epoch);
                    }
                    self.done.wait(&mut state);
                }
                _ => break,
            }
        }

        let epoch = state.begin(key.clone());
        drop(state);

        let mut guard = ComputeGuard {
            cache: self,
            key: &key,
            epoch,
            armed: true,
        };
        let result = compute(&key);
        guard.armed = false;

        let mut state = self.state.lock();
        if let Some((waiters, stale)) = state.take_computing(&key, epoch) {
            if let (Ok(value), false) = (&result, stale) {
                let now = self.clock.now();
                state.insert_ready(key.clone(), value.clone(), now, self.capacity);
            }
            if waiters > 0 {
                state.outcomes.insert(epoch, (result.clone(), waiters));
            }
        }
        drop(state);
        self.done.notify_all();
        result
    }

    pub fn get_if_present(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock();
        let now = self.clock.now();
        state.purge_idle(now, self.idle_timeout);
        state.touch(key, now)
    }

    pub fn put(&self, key: K, value: V) {
        let mut state = self.state.lock();
        let now = self.clock.now();
        state.purge_idle(now, self.idle_timeout);
        state.insert_ready(key, value, now, self.capacity);
        drop(state);
        self.done.notify_all();
    }

    /// Drop `key`. A computation in flight for it still completes, but its
    /// result is not kept.
    pub fn invalidate(&self, key: &K) {
        let mut state = self.state.lock();
        if let Some(Slot::Computing { stale, .. }) = state.slots.get_mut(key) {
            *stale = true;
            return;
        }
        state.remove_ready(key);
    }

    pub fn invalidate_where(&self, mut predicate: impl FnMut(&K) -> bool) {
        let mut state = self.state.lock();
        let doomed: Vec<K> = state.slots.keys().filter(|k| predicate(k)).cloned().collect();
        for key in doomed {
            if let Some(Slot::Computing { stale, .. }) = state.slots.get_mut(&key) {
                *stale = true;
            } else {
                state.remove_ready(&key);
            }
        }
    }

    pub fn clear(&self) {
        self.invalidate_where(|_| true);
    }

    /// Number of ready entries.
    pub fn len(&self) -> usize {
        self.state.lock().ready_len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases a computing slot if `compute` unwinds, so waiters retry instead
/// of blocking forever.
struct ComputeGuard<'a, K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    cache: &'a CommonCache<K, V, E>,
    key: &'a K,
    epoch: u64,
    armed: bool,
}

impl<K, V, E> Drop for ComputeGuard<'_, K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.cache.state.lock().take_computing(self.key, self.epoch);
        self.cache.done.notify_all();
    }
}
