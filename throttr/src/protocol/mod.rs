//! Binary wire protocol
//!
//! A compact, fixed-layout protocol: one byte of verb, one byte of key
//! length, the key, and a payload whose size is fixed per verb. All integers
//! are big-endian. The codec performs no I/O; it transforms in-memory
//! buffers, so it can be driven from any byte stream.
//!
//! # Key Length Limitation
//!
//! Keys are limited to **255 bytes** because the length prefix is a single
//! byte. Servers may configure a lower limit, reported per request as
//! `KeyTooLong`.
//!
//! # Request Format
//!
//! ```text
//! ┌──────┬─────────┬─────┬─────────────────────┐
//! │ verb │ key_len │ key │ payload (per verb)  │
//! ├──────┼─────────┼─────┼─────────────────────┤
//! │  u8  │   u8    │ var │ 0, 8 or 17 bytes    │
//! └──────┴─────────┴─────┴─────────────────────┘
//! ```
//!
//! | Verb       | id     | Payload                                  |
//! |------------|--------|------------------------------------------|
//! | `INSERT`   | `0x01` | counter `u64`, ttl_mode `u8`, ttl `u64`  |
//! | `QUERY`    | `0x02` | none                                     |
//! | `UPDATE`   | `0x03` | counter `u64`, ttl_mode `u8`, ttl `u64`  |
//! | `PURGE`    | `0x04` | none                                     |
//! | `CONSUME`  | `0x05` | amount `u64`                             |
//! | `INCREASE` | `0x06` | amount `u64`                             |
//!
//! `ttl_mode` is `0` (none), `1` (absolute deadline since the UNIX epoch) or
//! `2` (duration from the call). `UPDATE` also accepts `0xFF` to leave the
//! TTL untouched. With modes `0` and `0xFF` the ttl value must be zero.
//!
//! # Response Format
//!
//! ```text
//! ┌────────┬──────────────────────────────┐
//! │ status │ payload (successes only)     │
//! ├────────┼──────────────────────────────┤
//! │   u8   │ 0, 8 or 17 bytes             │
//! └────────┴──────────────────────────────┘
//! ```
//!
//! - `QUERY`: counter `u64`, ttl_mode `u8`, remaining ttl `u64`. A record
//!   with a deadline reports mode `2` and the time left, rounded up, whether
//!   it was created with mode `1` or `2`. A record without one reports mode
//!   `0` and zero. The payload is a valid INSERT/UPDATE ttl as-is.
//! - `CONSUME`, `INCREASE`: counter `u64` after the operation
//! - `INSERT`, `UPDATE`, `PURGE`: empty
//!
//! Failures carry no payload. See [`Status`] for the codes.

mod request;
mod response;
#[cfg(test)]
mod tests;

pub use request::Request;
pub use response::{QuotaInfo, Reply, Response};

use std::fmt;

/// Longest key the one-byte length prefix can describe
pub const MAX_WIRE_KEY_LENGTH: usize = u8::MAX as usize;

/// Verb id plus key length
pub const REQUEST_HEADER_LEN: usize = 2;

/// `ttl_mode` value asking `UPDATE` to keep the current TTL
pub const TTL_MODE_KEEP: u8 = 0xFF;

const COUNTER_LEN: usize = 8;
const QUOTA_LEN: usize = COUNTER_LEN + 1 + 8;

/// Longest possible request frame
pub const MAX_REQUEST_LEN: usize = REQUEST_HEADER_LEN + MAX_WIRE_KEY_LENGTH + QUOTA_LEN;

/// Protocol verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Verb {
    Insert = 0x01,
    Query = 0x02,
    Update = 0x03,
    Purge = 0x04,
    Consume = 0x05,
    Increase = 0x06,
}

impl Verb {
    pub const ALL: [Verb; 6] = [
        Verb::Insert,
        Verb::Query,
        Verb::Update,
        Verb::Purge,
        Verb::Consume,
        Verb::Increase,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Verb::Insert),
            0x02 => Some(Verb::Query),
            0x03 => Some(Verb::Update),
            0x04 => Some(Verb::Purge),
            0x05 => Some(Verb::Consume),
            0x06 => Some(Verb::Increase),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Fixed request payload size for this verb
    pub fn request_payload_len(self) -> usize {
        match self {
            Verb::Insert | Verb::Update => QUOTA_LEN,
            Verb::Consume | Verb::Increase => COUNTER_LEN,
            Verb::Query | Verb::Purge => 0,
        }
    }

    /// Fixed payload size of a successful response to this verb
    pub fn reply_payload_len(self) -> usize {
        match self {
            Verb::Query => QUOTA_LEN,
            Verb::Consume | Verb::Increase => COUNTER_LEN,
            Verb::Insert | Verb::Update | Verb::Purge => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Insert => "insert",
            Verb::Query => "query",
            Verb::Update => "update",
            Verb::Purge => "purge",
            Verb::Consume => "consume",
            Verb::Increase => "increase",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response status codes
///
/// `MalformedFrame` is sent right before the server closes the connection.
/// All other failures leave the connection open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    MalformedFrame = 1,
    KeyTooLong = 2,
    StoreFull = 3,
    AlreadyExists = 4,
    NotFound = 5,
    InsufficientQuota = 6,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::Ok,
        Status::MalformedFrame,
        Status::KeyTooLong,
        Status::StoreFull,
        Status::AlreadyExists,
        Status::NotFound,
        Status::InsufficientQuota,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::MalformedFrame => "malformed_frame",
            Status::KeyTooLong => "key_too_long",
            Status::StoreFull => "store_full",
            Status::AlreadyExists => "already_exists",
            Status::NotFound => "not_found",
            Status::InsufficientQuota => "insufficient_quota",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
