//! Sharded in-memory key store
//!
//! The store maps quota keys to [`QuotaRecord`]s and owns every mutation of
//! them. Keys are hashed onto a fixed set of shards, each behind its own
//! mutex, so operations on different keys proceed in parallel while
//! operations on the same key are serialized.
//!
//! Expired records are never returned. They are reclaimed lazily when their
//! key is touched and in bulk by [`KeyStore::sweep`], which callers run on a
//! fixed interval.
//!
//! # Example
//!
//! ```
//! use throttr::{Expiry, KeyStore, QuotaRecord};
//! use std::time::SystemTime;
//!
//! let store = KeyStore::builder()
//!     .shards(16)
//!     .max_keys(10_000)
//!     .max_key_length(64)
//!     .build();
//!
//! let now = SystemTime::now();
//! let existed = store
//!     .upsert(b"ip:10.0.0.1", QuotaRecord::new(100, Expiry::Never, now), now)
//!     .unwrap();
//! assert!(!existed);
//! assert_eq!(store.get(b"ip:10.0.0.1", now).unwrap().counter(), 100);
//! ```

mod shard;


use self::shard::Shard;
use super::QuotaError;
use super::record::QuotaRecord;
use crate::protocol::MAX_WIRE_KEY_LENGTH;
use parking_lot::Mutex;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

#[cfg(feature = "ahash")]
use ahash::RandomState;
#[cfg(not(feature = "ahash"))]
use std::collections::hash_map::RandomState;

// Configuration constants
const DEFAULT_SHARDS: usize = 64;
const DEFAULT_CAPACITY: usize = 1000;
const DEFAULT_MAX_KEYS: usize = 1_000_000;
const CAPACITY_OVERHEAD_FACTOR: f64 = 1.3;

/// Thread-safe quota record store
pub struct KeyStore {
    shards: Box<[Mutex<Shard>]>,
    hasher: RandomState,
    mask: usize,
    len: AtomicUsize,
    max_keys: usize,
    max_key_length: usize,
}

/// Builder for configuring a KeyStore
///
/// # Example
///
/// ```
/// use throttr::KeyStore;
///
/// let store = KeyStore::builder()
///     .shards(32)
///     .capacity(100_000)
///     .max_keys(1_000_000)
///     .build();
/// assert_eq!(store.shard_count(), 32);
/// ```
#[derive(Debug, Clone)]
pub struct KeyStoreBuilder {
    shards: usize,
    capacity: usize,
    max_keys: usize,
    max_key_length: usize,
}

impl KeyStore {
    /// Create a store with default configuration
    ///
    /// 64 shards, room for 1,000,000 keys of up to 255 bytes each.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> KeyStoreBuilder {
        KeyStoreBuilder::default()
    }

    fn with_config(config: KeyStoreBuilder) -> Self {
        let shard_count = config.shards.max(1).next_power_of_two();
        let per_shard = ((config.capacity as f64 * CAPACITY_OVERHEAD_FACTOR) as usize)
            .div_ceil(shard_count);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(Shard::with_capacity(per_shard)))
            .collect();

        KeyStore {
            shards,
            hasher: RandomState::new(),
            mask: shard_count - 1,
            len: AtomicUsize::new(0),
            max_keys: config.max_keys,
            max_key_length: config.max_key_length.min(MAX_WIRE_KEY_LENGTH),
        }
    }

    fn shard(&self, key: &[u8]) -> &Mutex<Shard> {
        let index = self.hasher.hash_one(key) as usize & self.mask;
        &self.shards[index]
    }

    fn check_key(&self, key: &[u8]) -> Result<(), QuotaError> {
        if key.len() > self.max_key_length {
            return Err(QuotaError::KeyTooLong {
                len: key.len(),
                max: self.max_key_length,
            });
        }
        Ok(())
    }

    /// Copy of the live record for `key`
    ///
    /// An expired record is reclaimed and reported as absent.
    pub fn get(&self, key: &[u8], now: SystemTime) -> Option<QuotaRecord> {
        let mut shard = self.shard(key).lock();
        shard.live_mut(key, now, &self.len).copied()
    }

    /// Insert or replace the record for `key`
    ///
    /// Returns whether a live record existed before. A replaced record
    /// keeps its original creation time.
    ///
    /// # Errors
    ///
    /// - [`QuotaError::KeyTooLong`]: the key exceeds `max_key_length`
    /// - [`QuotaError::StoreFull`]: the key is new and the store holds `max_keys`
    ///   records after expired ones are reclaimed
    pub fn upsert(
        &self,
        key: &[u8],
        mut record: QuotaRecord,
        now: SystemTime,
    ) -> Result<bool, QuotaError> {
        self.check_key(key)?;
        let mut reclaimed = false;

        loop {
            let mut shard = self.shard(key).lock();

            if let Some(existing) = shard.live_mut(key, now, &self.len) {
                record.inherit_created_at(existing);
                *existing = record;
                return Ok(true);
            }

            if shard.try_insert(key, record, &self.len, self.max_keys) {
                return Ok(false);
            }
            drop(shard);
            self.reclaim_for_new_key(now, &mut reclaimed)?;
        }
    }

    /// Insert `record` only if `key` holds no live record
    ///
    /// # Errors
    ///
    /// - [`QuotaError::AlreadyExists`]: a live record is present
    /// - [`QuotaError::KeyTooLong`] and [`QuotaError::StoreFull`] as for [`upsert`](Self::upsert)
    pub fn insert(
        &self,
        key: &[u8],
        record: QuotaRecord,
        now: SystemTime,
    ) -> Result<(), QuotaError> {
        self.check_key(key)?;
        let mut reclaimed = false;

        loop {
            let mut shard = self.shard(key).lock();

            if shard.live_mut(key, now, &self.len).is_some() {
                return Err(QuotaError::AlreadyExists);
            }

            if shard.try_insert(key, record, &self.len, self.max_keys) {
                return Ok(());
            }
            drop(shard);
            self.reclaim_for_new_key(now, &mut reclaimed)?;
        }
    }

    /// Sweep every shard once after a new key found the store full
    ///
    /// Must be called without a shard lock held. The caller retries under
    /// a fresh lock, since the key may have been written meanwhile.
    fn reclaim_for_new_key(&self, now: SystemTime, reclaimed: &mut bool) -> Result<(), QuotaError> {
        if *reclaimed || self.sweep(now) == 0 {
            return Err(QuotaError::StoreFull {
                max_keys: self.max_keys,
            });
        }
        *reclaimed = true;
        Ok(())
    }

    /// Run `f` against the live record for `key` under the shard lock
    ///
    /// This is the read-modify-write primitive: the lookup, `f` and the
    /// write-back form a single critical section. Returns `None` when the
    /// key is absent or expired.
    pub fn modify<R>(
        &self,
        key: &[u8],
        now: SystemTime,
        f: impl FnOnce(&mut QuotaRecord) -> R,
    ) -> Option<R> {
        let mut shard = self.shard(key).lock();
        shard.live_mut(key, now, &self.len).map(f)
    }

    /// Remove the record for `key`
    ///
    /// Returns true only if a live record was removed.
    pub fn remove(&self, key: &[u8], now: SystemTime) -> bool {
        let mut shard = self.shard(key).lock();
        if shard.live_mut(key, now, &self.len).is_none() {
            return false;
        }
        shard.remove(key, &self.len).is_some()
    }

    /// Remove every record whose deadline is at or before `now`
    ///
    /// Shards are locked one at a time, so concurrent operations on other
    /// shards are never blocked by a sweep.
    pub fn sweep(&self, now: SystemTime) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().sweep(now, &self.len))
            .sum()
    }

    /// Number of stored records, including expired ones not yet reclaimed
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    pub fn max_key_length(&self) -> usize {
        self.max_key_length
    }

    #[cfg(test)]
    fn raw_len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().raw_len()).sum()
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for KeyStoreBuilder {
    fn default() -> Self {
        Self {
            shards: DEFAULT_SHARDS,
            capacity: DEFAULT_CAPACITY,
            max_keys: DEFAULT_MAX_KEYS,
            max_key_length: MAX_WIRE_KEY_LENGTH,
        }
    }
}

impl KeyStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lock shards, rounded up to a power of two
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Expected number of keys, pre-allocated across shards
    ///
    /// The store will allocate 30% more space to reduce rehashing.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Upper bound on stored records; new keys beyond it fail with `StoreFull`
    pub fn max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }

    /// Longest accepted key in bytes, capped at the wire limit of 255
    pub fn max_key_length(mut self, max_key_length: usize) -> Self {
        self.max_key_length = max_key_length;
        self
    }

    pub fn build(self) -> KeyStore {
        KeyStore::with_config(self)
    }
}
