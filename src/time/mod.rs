//! GPS time ingestion and the reference clock
//!
//! Time flows through this module in one direction:
//!
//! 1. [`SerialLink`] reads NMEA lines from the receiver
//! 2. [`nmea::decode`] turns a `$GPRMC`/`$GPZDA` line into an [`NmeaFix`]
//! 3. [`GpsTimeSource`] tags each valid fix with its arrival instant, applies the
//!    calibrated serial delay and publishes a [`ClockSample`]
//! 4. [`ReferenceClock`] extrapolates the latest sample for any reader
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use gps_ntp::core::{ClockConfig, SerialConfig};
//! use gps_ntp::time::{GpsTimeSource, ReferenceClock, SerialLink};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = SerialConfig {
//!     device: "/dev/ttyACM0".to_string(),
//!     delay: 0.0421,
//!     ..Default::default()
//! };
//!
//! let clock = Arc::new(ReferenceClock::new(ClockConfig::default()));
//! let link = SerialLink::open(&config).unwrap();
//! let mut source = GpsTimeSource::new(link, clock.clone(), config);
//!
//! let shutdown = CancellationToken::new();
//! std::thread::spawn(move || source.run(&shutdown));
//! ```

pub mod clock;
pub mod gps;
pub mod nmea;
pub mod source;

pub use self::clock::{ClockReading, ClockSample, ClockState, ReferenceClock};
pub use self::gps::{GpsTimeSource, SourceStats};
pub use self::nmea::NmeaFix;
pub use self::source::{SentenceReader, SerialLink};
