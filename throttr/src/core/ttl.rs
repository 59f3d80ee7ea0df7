//! Time-to-live policy for quota records
//!
//! A TTL travels on the wire as a [`TtlSpec`]: a [`TtlMode`] plus a raw
//! integer whose meaning depends on the engine's configured [`TtlUnit`].
//! Once applied to a record it becomes an [`Expiry`] holding an absolute
//! deadline. Records are live while `now < deadline`.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// How a record expires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TtlMode {
    /// The record never expires
    None = 0,
    /// The TTL value is a deadline measured from the UNIX epoch
    ExpiresAt = 1,
    /// The TTL value is a duration measured from the mutating call
    ExpiresAfter = 2,
}

impl TtlMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TtlMode::None),
            1 => Some(TtlMode::ExpiresAt),
            2 => Some(TtlMode::ExpiresAfter),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// TTL as carried by a request: a mode and a value in [`TtlUnit`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TtlSpec {
    pub mode: TtlMode,
    pub value: u64,
}

impl TtlSpec {
    /// No expiry
    pub const fn none() -> Self {
        TtlSpec {
            mode: TtlMode::None,
            value: 0,
        }
    }

    /// Expire at `value` units after the UNIX epoch
    pub const fn expires_at(value: u64) -> Self {
        TtlSpec {
            mode: TtlMode::ExpiresAt,
            value,
        }
    }

    /// Expire `value` units after the call that applies this TTL
    pub const fn expires_after(value: u64) -> Self {
        TtlSpec {
            mode: TtlMode::ExpiresAfter,
            value,
        }
    }
}

impl Default for TtlSpec {
    fn default() -> Self {
        Self::none()
    }
}

/// Granularity of TTL values on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TtlUnit {
    Seconds,
    #[default]
    Milliseconds,
}

impl TtlUnit {
    /// Convert a wire value into a duration
    pub fn to_duration(self, value: u64) -> Duration {
        match self {
            TtlUnit::Seconds => Duration::from_secs(value),
            TtlUnit::Milliseconds => Duration::from_millis(value),
        }
    }

    /// Convert a duration into wire units, rounding up
    ///
    /// Rounding up keeps a live record from ever reporting zero remaining.
    pub fn to_units_ceil(self, duration: Duration) -> u64 {
        let per_unit = match self {
            TtlUnit::Seconds => 1_000_000_000u128,
            TtlUnit::Milliseconds => 1_000_000u128,
        };
        let units = duration.as_nanos().div_ceil(per_unit);
        u64::try_from(units).unwrap_or(u64::MAX)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TtlUnit::Seconds => "seconds",
            TtlUnit::Milliseconds => "milliseconds",
        }
    }
}

impl fmt::Display for TtlUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown [`TtlUnit`] name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ttl unit: {0}. Valid options are: seconds, milliseconds")]
pub struct ParseTtlUnitError(String);

impl FromStr for TtlUnit {
    type Err = ParseTtlUnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s" | "sec" | "secs" | "seconds" => Ok(TtlUnit::Seconds),
            "ms" | "millis" | "milliseconds" => Ok(TtlUnit::Milliseconds),
            _ => Err(ParseTtlUnitError(s.to_string())),
        }
    }
}

/// Resolved expiry of a stored record
///
/// The deadline exists iff the mode is not [`TtlMode::None`], which the
/// enum shape enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    At(SystemTime),
    After(SystemTime),
}

impl Expiry {
    /// Resolve a wire TTL against the time of the mutating call
    ///
    /// Deadlines that overflow the platform clock never expire.
    pub fn resolve(spec: TtlSpec, unit: TtlUnit, now: SystemTime) -> Self {
        let duration = unit.to_duration(spec.value);
        match spec.mode {
            TtlMode::None => Expiry::Never,
            TtlMode::ExpiresAt => UNIX_EPOCH
                .checked_add(duration)
                .map_or(Expiry::Never, Expiry::At),
            TtlMode::ExpiresAfter => now
                .checked_add(duration)
                .map_or(Expiry::Never, Expiry::After),
        }
    }

    pub fn mode(&self) -> TtlMode {
        match self {
            Expiry::Never => TtlMode::None,
            Expiry::At(_) => TtlMode::ExpiresAt,
            Expiry::After(_) => TtlMode::ExpiresAfter,
        }
    }

    pub fn deadline(&self) -> Option<SystemTime> {
        match self {
            Expiry::Never => None,
            Expiry::At(deadline) | Expiry::After(deadline) => Some(*deadline),
        }
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.deadline().is_some_and(|deadline| deadline <= now)
    }

    /// Time left before expiry, `None` for records that never expire
    pub fn remaining(&self, now: SystemTime) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.duration_since(now).unwrap_or(Duration::ZERO))
    }
}
