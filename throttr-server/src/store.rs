//! Engine factory
//!
//! Builds the shared [`QuotaEngine`] from the store section of the server
//! configuration. Every transport and the sweeper hold a clone of the
//! returned `Arc`; there is no actor or channel in between, since the store
//! serializes access per shard.

use crate::config::StoreConfig;
use std::sync::Arc;
use throttr::{KeyStore, QuotaEngine};

/// Create the quota engine described by `config`
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use throttr::TtlUnit;
/// use throttr_server::config::StoreConfig;
/// use throttr_server::store::create_engine;
///
/// let config = StoreConfig {
///     shards: 64,
///     capacity: 100_000,
///     max_keys: 1_000_000,
///     max_key_length: 255,
///     sweep_interval: Duration::from_secs(1),
///     ttl_unit: TtlUnit::Milliseconds,
/// };
/// let engine = create_engine(&config);
/// assert_eq!(engine.store().shard_count(), 64);
/// ```
pub fn create_engine(config: &StoreConfig) -> Arc<QuotaEngine> {
    let store = KeyStore::builder()
        .shards(config.shards)
        .capacity(config.capacity)
        .max_keys(config.max_keys)
        .max_key_length(config.max_key_length)
        .build();

    Arc::new(QuotaEngine::new(store).with_ttl_unit(config.ttl_unit))
}
