//! Utility module
//!
//! This module provides common conversions used by the configuration
//! layer and the serial time source.

use std::time::Duration;

/// Converts a duration to a floating-point number of seconds
pub fn duration_to_secs(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

/// Converts a floating-point number of seconds to a duration.
///
/// Negative and non-finite inputs give zero; values too large saturate.
pub fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Converts signed seconds to a chrono delta at nanosecond resolution
pub fn signed_secs_to_delta(secs: f64) -> chrono::Duration {
    if !secs.is_finite() {
        return chrono::Duration::zero();
    }
    let magnitude = secs_to_duration(secs.abs());
    let delta = chrono::Duration::from_std(magnitude).unwrap_or(chrono::Duration::zero());
    if secs < 0.0 {
        -delta
    } else {
        delta
    }
}
