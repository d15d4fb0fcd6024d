//! One-second traffic windows with reference-driven eviction.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::variant::VariantId;

/// Opaque identity of a requesting client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Arc<str>);

impl ClientId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<IpAddr> for ClientId {
    fn from(addr: IpAddr) -> Self {
        Self::new(addr.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a traffic counter inside a window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub client: ClientId,
    pub variant: VariantId,
}

impl CounterKey {
    pub fn new(client: ClientId, variant: VariantId) -> Self {
        Self { client, variant }
    }
}

/// Counts observed for one key, as of a single increment or read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTally {
    /// Window the counts belong to (seconds since the epoch).
    pub window: u64,
    /// Count for the `(client, variant)` key.
    pub count: u64,
    /// Count for the variant across all clients.
    pub variant_total: u64,
}

/// Traffic counts for a single second.
///
/// Counts only ever grow. Once a newer window becomes current the store stops
/// routing increments here, so a retained handle sees frozen values.
pub struct Window {
    id: u64,
    counts: DashMap<CounterKey, AtomicU64>,
    totals: DashMap<VariantId, AtomicU64>,
}

impl Window {
    fn new(id: u64) -> Self {
        Self {
            id,
            counts: DashMap::new(),
            totals: DashMap::new(),
        }
    }

    /// The second this window covers.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current count for a key, zero if never incremented here.
    pub fn count(&self, key: &CounterKey) -> u64 {
        self.counts
            .get(key)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Current count for a variant across all clients.
    pub fn variant_total(&self, variant: VariantId) -> u64 {
        self.totals
            .get(&variant)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Number of distinct keys seen in this window.
    pub fn key_count(&self) -> usize {
        self.counts.len()
    }

    fn increment(&self, key: &CounterKey) -> WindowTally {
        let count = bump(&self.counts, key);
        let variant_total = bump(&self.totals, &key.variant);

        WindowTally {
            window: self.id,
            count,
            variant_total,
        }
    }

    fn tally(&self, key: &CounterKey) -> WindowTally {
        WindowTally {
            window: self.id,
            count: self.count(key),
            variant_total: self.variant_total(key.variant),
        }
    }
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.id)
            .field("keys", &self.counts.len())
            .finish()
    }
}

/// Atomic add-one returning the post-increment value.
fn bump<K>(map: &DashMap<K, AtomicU64>, key: &K) -> u64
where
    K: Eq + std::hash::Hash + Clone,
{
    // Fast path: the key exists and only needs a shared shard lock.
    if let Some(counter) = map.get(key) {
        return counter.fetch_add(1, Ordering::SeqCst) + 1;
    }

    map.entry(key.clone())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::SeqCst)
        + 1
}

/// Store of per-second traffic windows.
///
/// The store owns exactly one strong reference: the current window. Every
/// window is also indexed weakly by id, so a superseded window stays
/// retrievable through [`WindowedCounterStore::window`] only while someone
/// outside the store holds it. Dead index entries are pruned on each window
/// transition, which keeps the resident set at O(1) windows.
pub struct WindowedCounterStore {
    clock: Arc<dyn Clock>,
    current: RwLock<Option<Arc<Window>>>,
    index: Mutex<HashMap<u64, Weak<Window>>>,
}

impl WindowedCounterStore {
    /// Create a store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            current: RwLock::new(None),
            index: Mutex::new(HashMap::new()),
        }
    }

    /// Increment the counter for `(client, variant)` in the current window.
    ///
    /// Returns the post-increment counts. Concurrent callers on the same key
    /// and window observe distinct, gap-free values.
    pub fn increment_and_get(&self, client: &ClientId, variant: VariantId) -> WindowTally {
        let key = CounterKey::new(client.clone(), variant);

        loop {
            let now = self.clock.now_secs();
            {
                // Holding the read guard across the increment keeps the window
                // current until the increment has landed.
                let current = self.current.read();
                if let Some(window) = current.as_ref().filter(|w| w.id == now) {
                    let tally = window.increment(&key);
                    trace!(
                        client = %key.client,
                        variant = ?variant,
                        window = now,
                        count = tally.count,
                        "Incremented traffic counter"
                    );
                    return tally;
                }
            }

            self.advance();
        }
    }

    /// Read the counts for `(client, variant)` in the current second without
    /// incrementing. Zero when no window exists for the current second.
    pub fn peek(&self, client: &ClientId, variant: VariantId) -> WindowTally {
        let key = CounterKey::new(client.clone(), variant);
        let now = self.clock.now_secs();

        let current = self.current.read();
        match current.as_ref().filter(|w| w.id == now) {
            Some(window) => window.tally(&key),
            None => WindowTally {
                window: now,
                count: 0,
                variant_total: 0,
            },
        }
    }

    /// Retrieve a window by id while it is still referenced somewhere.
    pub fn window(&self, id: u64) -> Option<Arc<Window>> {
        self.index.lock().get(&id).and_then(Weak::upgrade)
    }

    /// Id of the window currently receiving increments.
    pub fn current_window_id(&self) -> Option<u64> {
        self.current.read().as_ref().map(|w| w.id)
    }

    /// Number of windows still alive.
    pub fn resident_windows(&self) -> usize {
        self.index
            .lock()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Make a fresh window for the current second, unless another caller
    /// already did.
    ///
    /// The clock is read under the write lock. A caller whose own read went
    /// stale while it waited for the lock must not replace a newer window.
    fn advance(&self) {
        let mut current = self.current.write();
        let now = self.clock.now_secs();
        if current.as_ref().is_some_and(|w| w.id == now) {
            return;
        }

        // Any transition starts from zero, including a backward clock jump to
        // a second that was seen before.
        let window = Arc::new(Window::new(now));
        let previous = current.replace(Arc::clone(&window));
        drop(current);

        let previous_id = previous.as_ref().map(|w| w.id);
        drop(previous);

        let mut index = self.index.lock();
        index.retain(|_, w| w.strong_count() > 0);
        index.insert(now, Arc::downgrade(&window));

        debug!(
            window = now,
            previous = ?previous_id,
            resident = index.len(),
            "Opened traffic window"
        );
    }
}

impl Default for WindowedCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WindowedCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowedCounterStore")
            .field("clock", &self.clock)
            .field("current", &self.current_window_id())
            .finish()
    }
}
