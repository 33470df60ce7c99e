use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result};
use crate::protocol::LeapIndicator;

/// The two time-bearing NMEA sentence kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SentenceType {
    /// Recommended Minimum (`$GPRMC`): time, status flag, `ddmmyy` date
    Rmc,
    /// Time & Date (`$GPZDA`): time, separate day/month/year fields
    Zda,
}

impl SentenceType {
    /// Three-letter sentence formatter, without talker ID
    pub fn formatter(&self) -> &'static str {
        match self {
            SentenceType::Rmc => "RMC",
            SentenceType::Zda => "ZDA",
        }
    }
}

impl fmt::Display for SentenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$GP{}", self.formatter())
    }
}

impl FromStr for SentenceType {
    type Err = Error;

    /// Accepts `$GPRMC`, `GPRMC` or `RMC` (and the ZDA equivalents), any case.
    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().trim_start_matches('$').to_ascii_uppercase();
        let formatter = match upper.len() {
            3 => upper.as_str(),
            5 => upper.get(2..).unwrap_or(""),
            _ => "",
        };
        match formatter {
            "RMC" => Ok(SentenceType::Rmc),
            "ZDA" => Ok(SentenceType::Zda),
            _ => Err(Error::config(format!("unknown NMEA sentence type {:?}", s))),
        }
    }
}

/// Largest serial delay magnitude accepted, in seconds
const MAX_SERIAL_DELAY: f64 = 86_400.0;

/// Largest serial error bound accepted, in seconds; the short format ceiling
const MAX_ERROR_BOUND: f64 = 65_535.0;

/// Serial link and calibration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial device path
    pub device: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Sentence kind the receiver is trusted to carry time in
    pub sentence: SentenceType,
    /// Fixed serial delay in seconds (signed), subtracted from decoded time
    pub delay: f64,
    /// Serial error bound in seconds, published as the sample dispersion
    pub error_bound: f64,
    /// Read timeout on the port
    #[serde(with = "super::serde::duration_secs")]
    pub read_timeout: Duration,
    /// Expected interval between fixes
    #[serde(with = "super::serde::duration_secs")]
    pub fix_period: Duration,
    /// Silent fix periods tolerated before the clock is marked unsynchronized
    pub missed_fixes: u32,
    /// Consecutive read errors tolerated before the clock is marked unsynchronized
    pub max_read_errors: u32,
    /// First retry delay after a read error
    #[serde(with = "super::serde::duration_secs")]
    pub retry_backoff: Duration,
    /// Retry delay ceiling
    #[serde(with = "super::serde::duration_secs")]
    pub max_retry_backoff: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            device: "/dev/ttyAMA0".to_string(),
            baud_rate: 9600,
            sentence: SentenceType::Rmc,
            delay: 0.0,
            error_bound: 0.0,
            read_timeout: Duration::from_millis(250),
            fix_period: Duration::from_secs(1),
            missed_fixes: 5,
            max_read_errors: 5,
            retry_backoff: Duration::from_millis(250),
            max_retry_backoff: Duration::from_secs(8),
        }
    }
}

impl SerialConfig {
    /// Silence on the link longer than this marks the clock unsynchronized
    pub fn silence_limit(&self) -> Duration {
        self.fix_period.saturating_mul(self.missed_fixes)
    }
}

/// NTP service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NtpConfig {
    /// Local address to bind to
    pub bind_addr: SocketAddr,
    /// Poll exponent advertised in replies (log2 seconds)
    pub poll: i8,
    /// Clock precision advertised in replies (log2 seconds)
    pub precision: i8,
    /// Leap indicator passed through while synchronized
    pub leap_indicator: LeapIndicator,
    /// Maximum number of requests handled at once
    pub max_in_flight: usize,
}

impl Default for NtpConfig {
    fn default() -> Self {
        NtpConfig {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), super::DEFAULT_PORT),
            poll: 10,
            precision: super::CLOCK_PRECISION,
            leap_indicator: LeapIndicator::NoWarning,
            max_in_flight: 1024,
        }
    }
}

/// Reference clock quality model
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Sample age beyond which the clock reports unsynchronized
    #[serde(with = "super::serde::duration_secs")]
    pub max_sample_age: Duration,
    /// Local oscillator tolerance used to grow dispersion, in PPM
    pub frequency_tolerance_ppm: f64,
    /// Minimum root dispersion advertised while unsynchronized
    #[serde(with = "super::serde::duration_secs")]
    pub unsynchronized_dispersion: Duration,
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockConfig {
            max_sample_age: Duration::from_secs(8),
            frequency_tolerance_ppm: 15.0,
            unsynchronized_dispersion: Duration::from_secs(16),
        }
    }
}

/// Configuration for the GPS NTP server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub serial: SerialConfig,
    pub ntp: NtpConfig,
    pub clock: ClockConfig,
}

impl Config {
    /// Checks everything that can be checked before touching any device.
    pub fn validate(&self) -> Result<()> {
        let serial = &self.serial;
        if serial.device.trim().is_empty() {
            return Err(Error::config("serial device must be set"));
        }
        if serial.baud_rate == 0 {
            return Err(Error::config("baud rate must be positive"));
        }
        if !serial.delay.is_finite() || serial.delay.abs() > MAX_SERIAL_DELAY {
            return Err(Error::config(format!(
                "serial delay must be within {} seconds, got {}",
                MAX_SERIAL_DELAY, serial.delay
            )));
        }
        if !(0.0..=MAX_ERROR_BOUND).contains(&serial.error_bound) {
            return Err(Error::config(format!(
                "serial error bound must be between 0 and {} seconds, got {}",
                MAX_ERROR_BOUND, serial.error_bound
            )));
        }
        if serial.read_timeout.is_zero() || serial.fix_period.is_zero() {
            return Err(Error::config("read timeout and fix period must be positive"));
        }
        if serial.missed_fixes == 0 || serial.max_read_errors == 0 {
            return Err(Error::config("missed fixes and read error limits must be positive"));
        }
        if serial.retry_backoff > serial.max_retry_backoff {
            return Err(Error::config("retry backoff exceeds its ceiling"));
        }

        let ntp = &self.ntp;
        if !(0..=super::MAX_POLL).contains(&ntp.poll) {
            return Err(Error::config(format!(
                "poll exponent must be within 0..={}, got {}",
                super::MAX_POLL,
                ntp.poll
            )));
        }
        if ntp.leap_indicator == LeapIndicator::Unsynchronized {
            return Err(Error::config("leap indicator 3 is reserved for unsynchronized operation"));
        }
        if ntp.max_in_flight == 0 {
            return Err(Error::config("max in-flight requests must be positive"));
        }

        let clock = &self.clock;
        if clock.max_sample_age.is_zero() {
            return Err(Error::config("max sample age must be positive"));
        }
        if !clock.frequency_tolerance_ppm.is_finite() || clock.frequency_tolerance_ppm < 0.0 {
            return Err(Error::config("frequency tolerance must be finite and non-negative"));
        }

        Ok(())
    }
}
