use std::net::{IpAddr, SocketAddr};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gps_ntp::core::{Config, SentenceType};
use gps_ntp::network::TimeServer;
use gps_ntp::protocol::LeapIndicator;
use gps_ntp::{util, Error, Result};

/// Stratum 1 NTP server fed by a serial GPS receiver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial device the GPS receiver is attached to
    #[arg(long, env = "SERIAL_PORT")]
    serial_port: String,

    /// Serial baud rate
    #[arg(long, env = "SERIAL_BAUD", default_value_t = 9600)]
    serial_baud: u32,

    /// Calibrated serial delay in seconds, subtracted from GPS time
    #[arg(long, env = "SERIAL_DELAY", default_value_t = 0.0, allow_negative_numbers = true)]
    serial_delay: f64,

    /// Calibrated serial error bound in seconds
    #[arg(long, env = "SERIAL_ERROR", default_value_t = 0.0)]
    serial_error: f64,

    /// NMEA sentence carrying time ($GPRMC or $GPZDA)
    #[arg(long, env = "NMEA_TYPE", default_value = "$GPRMC")]
    nmea_type: SentenceType,

    /// Address to serve NTP on
    #[arg(long, env = "NTP_ADDRESS", default_value = "0.0.0.0")]
    address: IpAddr,

    /// UDP port to serve NTP on
    #[arg(long, env = "NTP_PORT", default_value_t = gps_ntp::core::DEFAULT_PORT)]
    port: u16,

    /// Poll exponent advertised to clients (log2 seconds)
    #[arg(long, env = "NTP_POLL", default_value_t = 10)]
    poll: i8,

    /// Leap indicator advertised while synchronized (0-2)
    #[arg(long, env = "NTP_LEAP", default_value_t = 0)]
    leap: u8,

    /// Seconds without a fix before replies degrade to stratum 16
    #[arg(long, default_value_t = 8.0)]
    max_sample_age: f64,

    /// Silent fix periods before the clock is marked unsynchronized
    #[arg(long, default_value_t = 5)]
    missed_fixes: u32,

    /// Maximum number of requests handled concurrently
    #[arg(long, default_value_t = 1024)]
    max_in_flight: usize,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = Config::default();

        config.serial.device = self.serial_port;
        config.serial.baud_rate = self.serial_baud;
        config.serial.delay = self.serial_delay;
        config.serial.error_bound = self.serial_error;
        config.serial.sentence = self.nmea_type;
        config.serial.missed_fixes = self.missed_fixes;

        config.ntp.bind_addr = SocketAddr::new(self.address, self.port);
        config.ntp.poll = self.poll;
        config.ntp.leap_indicator = LeapIndicator::from_code(self.leap)?;
        config.ntp.max_in_flight = self.max_in_flight;

        config.clock.max_sample_age = util::secs_to_duration(self.max_sample_age);

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let print_config = args.print_config;
    let config = args.into_config().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    if print_config {
        let json = serde_json::to_string_pretty(&config)
            .map_err(|e| Error::config(format!("failed to serialize config: {}", e)))?;
        println!("{}", json);
        return Ok(());
    }

    info!(
        version = gps_ntp::VERSION,
        device = %config.serial.device,
        sentence = %config.serial.sentence,
        addr = %config.ntp.bind_addr,
        "Starting GPS NTP server"
    );

    let server = TimeServer::start(config).await.map_err(|e| {
        error!(error = %e, "Failed to start");
        e
    })?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => {
                warn!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
        }
        signal.cancel();
    });

    server.run(shutdown).await?;
    Ok(())
}
