//! Transport layer implementations for the quota server
//!
//! All transports implement the [`Transport`] trait and share one
//! [`QuotaEngine`] behind an `Arc`.
//!
//! # Available Transports
//!
//! - [`native`]: The binary quota protocol over TCP
//! - [`http`]: Health, Prometheus metrics and store statistics (no quota operations)

pub mod http;
pub mod native;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use throttr::QuotaEngine;
use tokio_util::sync::CancellationToken;

/// Common interface for all transport implementations
///
/// Each transport is responsible for:
/// - Accepting client connections
/// - Decoding protocol-specific requests
/// - Applying them to the shared engine
/// - Sending responses back to clients
#[async_trait]
pub trait Transport {
    /// Serve until `shutdown` is cancelled
    ///
    /// Returns once the listener is closed and in-flight connections have
    /// drained, or early with an error if the listener fails.
    async fn start(self, engine: Arc<QuotaEngine>, shutdown: CancellationToken) -> Result<()>;
}
