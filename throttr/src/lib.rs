//! # Throttr
//!
//! An in-memory quota engine and the binary protocol that drives it.
//!
//! ## Overview
//!
//! Throttr keeps one counter per opaque byte key. Clients create a quota with
//! `INSERT`, spend it with `CONSUME`, top it up with `INCREASE`, overwrite it
//! with `UPDATE`, inspect it with `QUERY` and drop it with `PURGE`:
//! - **Atomic consumption**: a `CONSUME` either takes the whole amount or
//!   leaves the counter untouched
//! - **Per-key TTL**: records expire at an absolute deadline or after a
//!   duration, and expired records are never observable
//! - **Bounded memory**: the store enforces a maximum key count and key length
//!
//! ## Quick Start
//!
//! ```
//! use throttr::{KeyStore, QuotaEngine, TtlSpec};
//! use std::time::SystemTime;
//!
//! let engine = QuotaEngine::new(KeyStore::new());
//! let now = SystemTime::now();
//!
//! // 100 calls, valid for one minute
//! engine.insert(b"user:42", 100, TtlSpec::expires_after(60_000), now)?;
//!
//! let left = engine.consume(b"user:42", 30, now)?;
//! assert_eq!(left, 70);
//!
//! let info = engine.query(b"user:42", now)?;
//! assert_eq!(info.counter, 70);
//! # Ok::<(), throttr::QuotaError>(())
//! ```
//!
//! ## Wire Protocol
//!
//! The [`protocol`] module encodes and decodes request and response frames
//! without doing any I/O. [`QuotaEngine::execute`] turns a decoded
//! [`Request`] into the [`Response`] to send back:
//!
//! ```
//! use bytes::BytesMut;
//! use throttr::{KeyStore, QuotaEngine, Request, Response, Reply, TtlSpec};
//! use std::time::SystemTime;
//!
//! let engine = QuotaEngine::new(KeyStore::new());
//! let mut buf = BytesMut::new();
//! Request::Insert {
//!     key: "ip:10.0.0.1".into(),
//!     counter: 5,
//!     ttl: TtlSpec::none(),
//! }
//! .encode(&mut buf)?;
//!
//! let request = Request::parse(&mut buf)?.expect("complete frame");
//! let response = engine.execute(request, SystemTime::now());
//! assert_eq!(response, Response::Success(Reply::Empty));
//! # Ok::<(), throttr::QuotaError>(())
//! ```
//!
//! ## Thread Safety
//!
//! [`QuotaEngine`] is `Send + Sync`. Keys are spread over independently
//! locked shards, so share the engine behind an `Arc`:
//!
//! ```
//! use std::sync::Arc;
//! use throttr::{KeyStore, QuotaEngine};
//!
//! let engine = Arc::new(QuotaEngine::new(KeyStore::builder().shards(128).build()));
//! ```
//!
//! ## Features
//!
//! - `ahash` (default): Use AHash for faster hashing

pub mod core;
pub mod protocol;

pub use crate::core::{
    Expiry, KeyStore, KeyStoreBuilder, ParseTtlUnitError, QuotaEngine, QuotaError, QuotaRecord,
    TtlMode, TtlSpec, TtlUnit,
};
pub use protocol::{QuotaInfo, Reply, Request, Response, Status, Verb};

// Re-export the store module so benchmarks can access it
pub use crate::core::store;
