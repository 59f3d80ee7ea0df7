//! Quota engine
//!
//! This module provides [`QuotaEngine`], which applies the protocol verbs
//! to a [`KeyStore`]. Each operation is a transaction against exactly one
//! key; read-modify-write steps run inside the store's shard lock.

use super::QuotaError;
use super::record::QuotaRecord;
use super::store::KeyStore;
use super::ttl::{Expiry, TtlSpec, TtlUnit};
use crate::protocol::{QuotaInfo, Reply, Request, Response};
use std::time::SystemTime;

/// Quota engine over a sharded key store
///
/// The engine is `Sync`; share it behind an `Arc` and call it from as many
/// threads or tasks as needed.
///
/// # Example
///
/// ```
/// use throttr::{KeyStore, QuotaEngine, QuotaError, TtlSpec, TtlUnit};
/// use std::time::SystemTime;
///
/// let engine = QuotaEngine::new(KeyStore::new()).with_ttl_unit(TtlUnit::Seconds);
/// let now = SystemTime::now();
///
/// // 100 requests for the next minute
/// engine.insert(b"user:42", 100, TtlSpec::expires_after(60), now)?;
///
/// assert_eq!(engine.consume(b"user:42", 30, now)?, 70);
/// assert!(matches!(
///     engine.consume(b"user:42", 80, now),
///     Err(QuotaError::InsufficientQuota { .. })
/// ));
/// assert!(engine.purge(b"user:42", now));
/// # Ok::<(), QuotaError>(())
/// ```
pub struct QuotaEngine {
    store: KeyStore,
    ttl_unit: TtlUnit,
}

impl QuotaEngine {
    /// Create an engine interpreting TTL values in milliseconds
    pub fn new(store: KeyStore) -> Self {
        QuotaEngine {
            store,
            ttl_unit: TtlUnit::default(),
        }
    }

    /// Set the unit TTL values are expressed in
    pub fn with_ttl_unit(mut self, ttl_unit: TtlUnit) -> Self {
        self.ttl_unit = ttl_unit;
        self
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    pub fn ttl_unit(&self) -> TtlUnit {
        self.ttl_unit
    }

    fn resolve(&self, ttl: TtlSpec, now: SystemTime) -> Expiry {
        Expiry::resolve(ttl, self.ttl_unit, now)
    }

    /// Create a record for `key`
    ///
    /// # Errors
    ///
    /// - [`QuotaError::AlreadyExists`]: the key holds a live record
    /// - [`QuotaError::KeyTooLong`]: the key exceeds the store's limit
    /// - [`QuotaError::StoreFull`]: the store holds `max_keys` records
    pub fn insert(
        &self,
        key: &[u8],
        counter: u64,
        ttl: TtlSpec,
        now: SystemTime,
    ) -> Result<(), QuotaError> {
        let record = QuotaRecord::new(counter, self.resolve(ttl, now), now);
        self.store.insert(key, record, now)
    }

    /// Report the counter and remaining TTL of `key` without mutating it
    ///
    /// Any deadline, absolute or relative, is reported as the time left in
    /// `ExpiresAfter` mode, so the returned TTL can be sent back in an
    /// UPDATE and keeps the same deadline, rounded up to the unit.
    pub fn query(&self, key: &[u8], now: SystemTime) -> Result<QuotaInfo, QuotaError> {
        let record = self.store.get(key, now).ok_or(QuotaError::NotFound)?;
        let ttl = match record.remaining_ttl(now) {
            Some(remaining) => TtlSpec::expires_after(self.ttl_unit.to_units_ceil(remaining)),
            None => TtlSpec::none(),
        };

        Ok(QuotaInfo {
            counter: record.counter(),
            ttl,
        })
    }

    /// Overwrite the counter of `key`, and its TTL when one is given
    ///
    /// A relative TTL is measured from `now`, so repeating the same update
    /// keeps pushing the deadline forward.
    pub fn update(
        &self,
        key: &[u8],
        counter: u64,
        ttl: Option<TtlSpec>,
        now: SystemTime,
    ) -> Result<(), QuotaError> {
        let expiry = ttl.map(|ttl| self.resolve(ttl, now));
        self.store
            .modify(key, now, |record| {
                record.set_counter(counter);
                if let Some(expiry) = expiry {
                    record.set_expiry(expiry);
                }
            })
            .ok_or(QuotaError::NotFound)
    }

    /// Take `amount` from the counter of `key`, all or nothing
    ///
    /// The check and the decrement happen under one shard lock, so
    /// concurrent consumers can never overdraw a counter.
    ///
    /// # Returns
    ///
    /// The counter after the decrement.
    ///
    /// # Errors
    ///
    /// - [`QuotaError::InsufficientQuota`]: the counter is below `amount`; it is left unchanged
    /// - [`QuotaError::NotFound`]: the key is absent or expired
    pub fn consume(&self, key: &[u8], amount: u64, now: SystemTime) -> Result<u64, QuotaError> {
        self.store
            .modify(key, now, |record| record.try_consume(amount))
            .ok_or(QuotaError::NotFound)?
    }

    /// Add `amount` to the counter of `key`, saturating at `u64::MAX`
    pub fn increase(&self, key: &[u8], amount: u64, now: SystemTime) -> Result<u64, QuotaError> {
        self.store
            .modify(key, now, |record| record.replenish(amount))
            .ok_or(QuotaError::NotFound)
    }

    /// Remove `key`; returns false if there was nothing live to remove
    pub fn purge(&self, key: &[u8], now: SystemTime) -> bool {
        self.store.remove(key, now)
    }

    /// Reclaim every expired record; returns how many were removed
    pub fn sweep(&self, now: SystemTime) -> usize {
        self.store.sweep(now)
    }

    /// Number of records currently held, including unreclaimed expired ones
    pub fn key_count(&self) -> usize {
        self.store.len()
    }

    /// Apply a decoded request and build its response
    ///
    /// A purge of an absent key is reported with the `NotFound` status; it
    /// is not an error at the engine level.
    pub fn execute(&self, request: Request, now: SystemTime) -> Response {
        let result = match request {
            Request::Insert { key, counter, ttl } => {
                self.insert(&key, counter, ttl, now).map(|()| Reply::Empty)
            }
            Request::Query { key } => self.query(&key, now).map(Reply::Quota),
            Request::Update { key, counter, ttl } => {
                self.update(&key, counter, ttl, now).map(|()| Reply::Empty)
            }
            Request::Consume { key, amount } => self.consume(&key, amount, now).map(Reply::Counter),
            Request::Increase { key, amount } => {
                self.increase(&key, amount, now).map(Reply::Counter)
            }
            Request::Purge { key } => {
                if self.purge(&key, now) {
                    Ok(Reply::Empty)
                } else {
                    Err(QuotaError::NotFound)
                }
            }
        };
        Response::from(result)
    }
}
