//! GPS NTP: a Stratum 1 NTP server disciplined by NMEA time from a serial GPS receiver
//!
//! The receiver's `$GPRMC` or `$GPZDA` sentences feed a lock-free reference clock,
//! which a UDP listener reads to answer NTP client and symmetric-active requests.
//!
//! ```no_run
//! use gps_ntp::core::Config;
//! use gps_ntp::network::TimeServer;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> gps_ntp::Result<()> {
//!     let mut config = Config::default();
//!     config.serial.device = "/dev/ttyACM0".to_string();
//!
//!     let server = TimeServer::start(config).await?;
//!     server.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod network;
pub mod protocol;
pub mod time;
pub mod util;

// Re-export commonly used items
pub use crate::core::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
