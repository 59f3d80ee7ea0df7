//! Core components of the throttr quota engine
//!
//! This module contains the fundamental building blocks:
//! - [`ttl`]: Expiry policy and the units TTL values are expressed in
//! - [`record`]: The accounting record bound to each quota key
//! - [`store`]: The sharded in-memory key store
//! - [`engine`]: The quota engine applying protocol verbs to the store

pub mod engine;
pub mod record;
pub mod store;
pub mod ttl;

pub use engine::QuotaEngine;
pub use record::QuotaRecord;
pub use store::{KeyStore, KeyStoreBuilder};
pub use ttl::{Expiry, ParseTtlUnitError, TtlMode, TtlSpec, TtlUnit};

use crate::protocol::Status;
use thiserror::Error;

/// Errors produced by the codec, the engine and the key store
///
/// Every variant maps to exactly one wire [`Status`]. Only
/// [`MalformedFrame`](QuotaError::MalformedFrame) is fatal to a connection;
/// the others are reported to the client and the connection continues.
///
/// # Example
///
/// ```
/// use throttr::{KeyStore, QuotaEngine, QuotaError, TtlSpec};
/// use std::time::SystemTime;
///
/// let engine = QuotaEngine::new(KeyStore::new());
/// let now = SystemTime::now();
///
/// engine.insert(b"user:1", 5, TtlSpec::none(), now).unwrap();
/// match engine.consume(b"user:1", 10, now) {
///     Err(QuotaError::InsufficientQuota { available, .. }) => assert_eq!(available, 5),
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaError {
    /// The frame could not be decoded; frame sync is lost
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
    /// The key exceeds the configured maximum length
    #[error("key too long: {len} bytes (max: {max})")]
    KeyTooLong { len: usize, max: usize },
    /// The store holds `max_keys` records and the key is new
    #[error("store full: {max_keys} keys")]
    StoreFull { max_keys: usize },
    /// INSERT on a key that already holds a live record
    #[error("key already exists")]
    AlreadyExists,
    /// The key is absent or its record has expired
    #[error("key not found")]
    NotFound,
    /// CONSUME asked for more than the counter holds
    #[error("insufficient quota: requested {requested}, available {available}")]
    InsufficientQuota { requested: u64, available: u64 },
}

impl QuotaError {
    /// Wire status code reported for this error
    pub fn status(&self) -> Status {
        match self {
            QuotaError::MalformedFrame(_) => Status::MalformedFrame,
            QuotaError::KeyTooLong { .. } => Status::KeyTooLong,
            QuotaError::StoreFull { .. } => Status::StoreFull,
            QuotaError::AlreadyExists => Status::AlreadyExists,
            QuotaError::NotFound => Status::NotFound,
            QuotaError::InsufficientQuota { .. } => Status::InsufficientQuota,
        }
    }

    /// Whether the connection that produced this error must be closed
    pub fn is_fatal(&self) -> bool {
        matches!(self, QuotaError::MalformedFrame(_))
    }
}
