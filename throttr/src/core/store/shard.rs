use crate::core::record::QuotaRecord;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

#[cfg(feature = "ahash")]
use ahash::AHashMap as HashMap;
#[cfg(not(feature = "ahash"))]
use std::collections::HashMap;

/// One lock-scoped partition of the key store
///
/// Every method expects the caller to hold the shard's mutex. The shared
/// `len` counter is only touched here, so it moves in lockstep with the
/// shard maps.
pub(super) struct Shard {
    records: HashMap<Box<[u8]>, QuotaRecord>,
}

impl Shard {
    pub(super) fn with_capacity(capacity: usize) -> Self {
        Shard {
            records: HashMap::with_capacity(capacity),
        }
    }

    /// Live record for `key`, reclaiming it first if it has expired
    pub(super) fn live_mut(
        &mut self,
        key: &[u8],
        now: SystemTime,
        len: &AtomicUsize,
    ) -> Option<&mut QuotaRecord> {
        if self
            .records
            .get(key)
            .is_some_and(|record| record.is_expired(now))
        {
            self.records.remove(key);
            len.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        self.records.get_mut(key)
    }

    /// Insert a record for a key known to be absent from this shard
    ///
    /// Reserves a slot in the global count first and returns false without
    /// inserting when the store already holds `max_keys` records.
    pub(super) fn try_insert(
        &mut self,
        key: &[u8],
        record: QuotaRecord,
        len: &AtomicUsize,
        max_keys: usize,
    ) -> bool {
        if !reserve_slot(len, max_keys) {
            return false;
        }
        self.records.insert(Box::from(key), record);
        true
    }

    pub(super) fn remove(&mut self, key: &[u8], len: &AtomicUsize) -> Option<QuotaRecord> {
        let removed = self.records.remove(key);
        if removed.is_some() {
            len.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Drop every record whose deadline has passed
    pub(super) fn sweep(&mut self, now: SystemTime, len: &AtomicUsize) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        let removed = before - self.records.len();
        if removed > 0 {
            len.fetch_sub(removed, Ordering::AcqRel);
        }
        removed
    }

    #[cfg(test)]
    pub(super) fn raw_len(&self) -> usize {
        self.records.len()
    }
}

fn reserve_slot(len: &AtomicUsize, max_keys: usize) -> bool {
    len.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        (current < max_keys).then_some(current + 1)
    })
    .is_ok()
}
