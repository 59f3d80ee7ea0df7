//! # Throttr Server
//!
//! A standalone quota server speaking the Throttr binary protocol.
//!
//! ## Purpose
//!
//! Throttr keeps per-key counters in memory and lets any number of services
//! spend them atomically over TCP. Instead of each service tracking its own
//! limits, they share one authority:
//!
//! - **Create** a quota with `INSERT`, optionally with a TTL
//! - **Spend** it with `CONSUME`; an overdraft is rejected, never clamped
//! - **Refill** it with `INCREASE` or reset it with `UPDATE`
//! - **Inspect** it with `QUERY`, **drop** it with `PURGE`
//!
//! ## Quick Start
//!
//! ```bash
//! # Show all available options
//! throttr --help
//!
//! # Listen on all interfaces with second-granularity TTLs
//! throttr --native-host 0.0.0.0 --ttl-unit seconds
//!
//! # Also expose /health, /metrics and /stats
//! throttr --http --http-port 9001
//! ```
//!
//! ## Configuration
//!
//! Configure via CLI arguments, environment variables or a config file
//! (CLI takes precedence over env, env over the file):
//!
//! ```bash
//! # Via CLI
//! throttr --max-keys 500000 --sweep-interval 250
//!
//! # Via environment variables
//! export THROTTR_MAX_KEYS=500000
//! export THROTTR_SWEEP_INTERVAL=250
//! throttr
//!
//! # Via a file
//! throttr --config /etc/throttr.toml
//!
//! # List all available environment variables
//! throttr --list-env-vars
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐
//! │   Native    │   │    HTTP     │
//! │  Transport  │   │ (observe)   │
//! └──────┬──────┘   └──────┬──────┘
//!        │                 │
//!        └────────┬────────┘
//!                 │
//!           ┌─────▼─────┐      ┌─────────┐
//!           │QuotaEngine│◄─────┤ Sweeper │
//!           └─────┬─────┘      └─────────┘
//!                 │
//!           ┌─────▼─────┐
//!           │ KeyStore  │
//!           │ (sharded) │
//!           └───────────┘
//! ```
//!
//! Connections run on their own tasks and call the engine directly; the
//! store serializes operations per shard, so unrelated keys never contend.
//! The sweeper reclaims expired records on a fixed interval. A shared
//! cancellation token stops the sweeper and drains the transports on
//! SIGINT or SIGTERM.
//!
//! ## Native Protocol (Rust)
//!
//! ```ignore
//! use std::io::{Read, Write};
//! use std::net::TcpStream;
//!
//! let mut stream = TcpStream::connect("127.0.0.1:9000")?;
//! let key = b"user:42";
//!
//! // CONSUME 1 from user:42
//! let mut request = vec![0x05, key.len() as u8];
//! request.extend_from_slice(key);
//! request.extend_from_slice(&1u64.to_be_bytes());
//! stream.write_all(&request)?;
//!
//! let mut status = [0u8; 1];
//! stream.read_exact(&mut status)?;
//! if status[0] == 0 {
//!     let mut counter = [0u8; 8];
//!     stream.read_exact(&mut counter)?;
//!     println!("Remaining: {}", u64::from_be_bytes(counter));
//! }
//! ```

pub mod config;
pub mod metrics;
pub mod store;
pub mod sweeper;
pub mod transport;
