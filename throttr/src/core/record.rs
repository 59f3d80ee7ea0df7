//! Accounting state bound to a quota key

use super::QuotaError;
use super::ttl::{Expiry, TtlMode};
use std::time::{Duration, SystemTime};

/// A quota record
///
/// The counter is unsigned and only ever decremented through
/// [`try_consume`](QuotaRecord::try_consume), which rejects rather than
/// clamps, so it can never go below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaRecord {
    counter: u64,
    expiry: Expiry,
    created_at: SystemTime,
}

impl QuotaRecord {
    pub fn new(counter: u64, expiry: Expiry, created_at: SystemTime) -> Self {
        QuotaRecord {
            counter,
            expiry,
            created_at,
        }
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn expiry(&self) -> Expiry {
        self.expiry
    }

    pub fn ttl_mode(&self) -> TtlMode {
        self.expiry.mode()
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expiry.deadline()
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// A record is logically absent once `now` reaches its deadline
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expiry.is_expired(now)
    }

    pub fn remaining_ttl(&self, now: SystemTime) -> Option<Duration> {
        self.expiry.remaining(now)
    }

    pub fn set_counter(&mut self, counter: u64) {
        self.counter = counter;
    }

    pub fn set_expiry(&mut self, expiry: Expiry) {
        self.expiry = expiry;
    }

    /// Decrement by `amount` if the counter covers it, all or nothing
    pub fn try_consume(&mut self, amount: u64) -> Result<u64, QuotaError> {
        match self.counter.checked_sub(amount) {
            Some(counter) => {
                self.counter = counter;
                Ok(counter)
            }
            None => Err(QuotaError::InsufficientQuota {
                requested: amount,
                available: self.counter,
            }),
        }
    }

    /// Add `amount` to the counter, saturating at `u64::MAX`
    pub fn replenish(&mut self, amount: u64) -> u64 {
        self.counter = self.counter.saturating_add(amount);
        self.counter
    }

    /// Keep the original creation time when a record replaces a live one
    pub(crate) fn inherit_created_at(&mut self, previous: &QuotaRecord) {
        self.created_at = previous.created_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_is_all_or_nothing() {
        let now = SystemTime::now();
        let mut record = QuotaRecord::new(10, Expiry::Never, now);

        assert_eq!(record.try_consume(4).unwrap(), 6);
        assert_eq!(
            record.try_consume(7),
            Err(QuotaError::InsufficientQuota {
                requested: 7,
                available: 6
            })
        );
        assert_eq!(record.counter(), 6);
        assert_eq!(record.try_consume(6).unwrap(), 0);
        assert_eq!(record.try_consume(0).unwrap(), 0);
    }

    #[test]
    fn test_replenish_saturates() {
        let mut record = QuotaRecord::new(u64::MAX - 1, Expiry::Never, SystemTime::now());
        assert_eq!(record.replenish(5), u64::MAX);
    }

    #[test]
    fn test_expiry_accessors() {
        let now = SystemTime::now();
        let deadline = now + Duration::from_secs(1);
        let record = QuotaRecord::new(1, Expiry::After(deadline), now);

        assert_eq!(record.ttl_mode(), TtlMode::ExpiresAfter);
        assert_eq!(record.expires_at(), Some(deadline));
        assert_eq!(record.remaining_ttl(now), Some(Duration::from_secs(1)));
        assert!(!record.is_expired(now));
        assert!(record.is_expired(deadline));
    }
}
