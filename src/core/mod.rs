//! Core types and configuration for the GPS NTP server
//!
//! This module contains the error type and the settings shared by every component.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{ClockConfig, Config, NtpConfig, SentenceType, SerialConfig};

/// NTP protocol version written when none is echoed
pub const NTP_VERSION: u8 = 4;

/// Default UDP port for NTP
pub const DEFAULT_PORT: u16 = 123;

/// Stratum advertised while synchronized to GPS
pub const STRATUM_PRIMARY: u8 = 1;

/// Stratum advertised while unsynchronized
pub const STRATUM_UNSYNCHRONIZED: u8 = 16;

/// Reference identifier for a GPS primary source
pub const REFERENCE_ID_GPS: [u8; 4] = *b"GPS\0";

/// Precision of the monotonic clock as a log2 exponent (1 ns)
pub const CLOCK_PRECISION: i8 = -30;

/// Largest poll exponent accepted in configuration
pub const MAX_POLL: i8 = 17;
