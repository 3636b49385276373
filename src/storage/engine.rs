//! Sharded, Sliding-Expiry Key-Value Store
//!
//! Every entry carries an absolute deadline. A key stored without a TTL
//! gets one [`PERMANENT_HORIZON`] (100 years) out. A successful `get`
//! pushes the deadline out again by the TTL the key was stored with,
//! measured from the read.
//!
//! Expiry is only ever detected on lookup. Expired entries stay in the map
//! until overwritten, unless the optional sweeper (see `expiry`) is running.
//!
//! ## Locking
//!
//! Keys hash to one of 64 shards, each a `HashMap` behind its own
//! `RwLock`. `set` takes the shard's write lock for a single insert. `get`
//! looks under the read lock first and answers misses from there. A live
//! key is re-checked and refreshed under the write lock, so no writer can
//! slip in between the liveness check that decides the reply and the
//! refresh.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// Lifetime given to keys stored without a TTL.
pub const PERMANENT_HORIZON: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Computes the absolute deadline for an entry written or refreshed at `now`.
///
/// `None` means no TTL was requested and maps to [`PERMANENT_HORIZON`]. A TTL
/// too large to represent is clamped to the same horizon.
pub fn deadline(now: Instant, ttl: Option<Duration>) -> Instant {
    let window = ttl.unwrap_or(PERMANENT_HORIZON);
    now.checked_add(window)
        .or_else(|| now.checked_add(PERMANENT_HORIZON))
        .unwrap_or(now)
}

/// A stored value and its expiry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// The TTL requested on write (None = no expiry requested)
    pub ttl: Option<Duration>,
    /// The instant at and after which this entry reads as absent
    pub expires_at: Instant,
}

impl Entry {
    /// Creates an entry written at `now`.
    pub fn new(value: Bytes, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            value,
            ttl,
            expires_at: deadline(now, ttl),
        }
    }

    /// Checks if this entry has expired as of `now`.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Re-anchors the deadline to `now` using the original TTL.
    #[inline]
    pub fn refresh(&mut self, now: Instant) {
        self.expires_at = deadline(now, self.ttl);
    }

    /// Time left before the entry expires, zero once expired.
    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// A single shard containing a portion of the key-value pairs.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<Bytes, Entry>>,
}

/// Point-in-time counters from a [`StorageEngine`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Stored entries, including expired ones not yet reclaimed
    pub keys: u64,
    /// Total GET operations
    pub get_ops: u64,
    /// GETs that found a live key
    pub hits: u64,
    /// GETs that found nothing or an expired key
    pub misses: u64,
    /// Total SET operations
    pub set_ops: u64,
    /// Expired entries physically removed by a sweep
    pub expired: u64,
}

/// The key-value store shared by every connection.
///
/// Share it as an `Arc<StorageEngine>`. Every operation is synchronous and
/// holds at most one shard lock, for a single map access.
///
/// # Example
///
/// ```
/// use driftkv::storage::StorageEngine;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
///
/// // Set a key with no expiry
/// engine.set(Bytes::from("name"), Bytes::from("Ariz"), None);
/// assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
///
/// // Set a key that expires 60s after its last read
/// engine.set(Bytes::from("session"), Bytes::from("abc123"), Some(Duration::from_secs(60)));
/// ```
pub struct StorageEngine {
    shards: Box<[Shard]>,
    counters: Counters,
}

/// Running totals behind [`StorageStats`].
#[derive(Debug, Default)]
struct Counters {
    /// Entries physically present, live or expired
    keys: AtomicU64,
    gets: AtomicU64,
    hits: AtomicU64,
    sets: AtomicU64,
    /// Entries removed by `cleanup_expired`
    reclaimed: AtomicU64,
}

impl Counters {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
            counters: Counters::default(),
        }
    }

    /// The shard that owns `key`.
    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }

    /// Stores `value` under `key`, replacing any previous entry and its TTL.
    ///
    /// `ttl` of `None` stores the key with the permanent horizon.
    ///
    /// # Returns
    ///
    /// Returns `true` if a new key was created, `false` if an existing key was updated.
    pub fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> bool {
        self.set_at(key, value, ttl, Instant::now())
    }

    /// [`set`](Self::set) with an explicit write time.
    pub fn set_at(&self, key: Bytes, value: Bytes, ttl: Option<Duration>, now: Instant) -> bool {
        Counters::bump(&self.counters.sets);

        let entry = Entry::new(value, ttl, now);
        let mut data = self.shard(&key).data.write();

        // Count under the lock so a concurrent sweep never subtracts first
        match data.insert(key.clone(), entry) {
            Some(_) => {
                debug!(key = ?key, "Key already exists, overwriting");
                false
            }
            None => {
                Counters::bump(&self.counters.keys);
                true
            }
        }
    }

    /// Gets the value for a key, extending its life on success.
    ///
    /// Returns `None` if the key doesn't exist or has expired. An expired
    /// entry is left in place. A live entry has its deadline re-anchored to
    /// now using the TTL it was stored with.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_at(key, Instant::now())
    }

    /// [`get`](Self::get) with an explicit read time.
    pub fn get_at(&self, key: &[u8], now: Instant) -> Option<Bytes> {
        Counters::bump(&self.counters.gets);

        let shard = self.shard(key);

        // Misses are answered under the read lock
        {
            let data = shard.data.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired_at(now) => {}
                _ => return None,
            }
        }

        // Live key: the write lock makes check-and-refresh one step
        let mut data = shard.data.write();
        match data.get_mut(key) {
            Some(entry) if !entry.is_expired_at(now) => {
                entry.refresh(now);
                Counters::bump(&self.counters.hits);
                Some(entry.value.clone())
            }
            // Race: overwritten with a shorter TTL, or expired meanwhile
            _ => None,
        }
    }

    /// Returns a snapshot of a live entry without refreshing it.
    pub fn get_entry(&self, key: &[u8]) -> Option<Entry> {
        self.get_entry_at(key, Instant::now())
    }

    /// [`get_entry`](Self::get_entry) with an explicit read time.
    pub fn get_entry_at(&self, key: &[u8], now: Instant) -> Option<Entry> {
        let data = self.shard(key).data.read();
        data.get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .cloned()
    }

    /// Returns the approximate number of stored entries.
    ///
    /// Expired entries count until something reclaims them.
    pub fn len(&self) -> u64 {
        self.counters.keys.load(Ordering::Relaxed)
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StorageStats {
        let get_ops = self.counters.gets.load(Ordering::Relaxed);
        let hits = self.counters.hits.load(Ordering::Relaxed);

        // Misses are derived, not counted
        StorageStats {
            keys: self.counters.keys.load(Ordering::Relaxed),
            get_ops,
            hits,
            misses: get_ops.saturating_sub(hits),
            set_ops: self.counters.sets.load(Ordering::Relaxed),
            expired: self.counters.reclaimed.load(Ordering::Relaxed),
        }
    }

    /// Removes expired entries from all shards.
    ///
    /// Only the background sweeper calls this; lookups never reclaim space.
    ///
    /// # Returns
    ///
    /// Returns the number of entries that were removed.
    pub fn cleanup_expired(&self) -> u64 {
        self.cleanup_expired_at(Instant::now())
    }

    /// [`cleanup_expired`](Self::cleanup_expired) with an explicit sweep time.
    pub fn cleanup_expired_at(&self, now: Instant) -> u64 {
        let mut cleaned = 0u64;

        // One shard locked at a time; the others keep serving
        for shard in self.shards.iter() {
            let mut data = shard.data.write();
            let before = data.len();

            data.retain(|_, entry| !entry.is_expired_at(now));

            cleaned += (before - data.len()) as u64;
        }

        // Every removed entry was counted by set_at before we could see it
        if cleaned > 0 {
            self.counters.keys.fetch_sub(cleaned, Ordering::Relaxed);
            self.counters.reclaimed.fetch_add(cleaned, Ordering::Relaxed);
        }

        cleaned
    }
}
