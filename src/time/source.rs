use std::io::{self, BufRead, BufReader};

use serialport::SerialPort;
use tracing::{debug, info};

use crate::core::{Error, Result, SerialConfig};

/// Line-oriented input carrying NMEA sentences
///
/// Reads block for at most the reader's own timeout, which is reported as
/// `TimedOut` or `WouldBlock`.
pub trait SentenceReader: Send {
    /// Appends the next line, including its terminator, to `buf`.
    ///
    /// Follows [`BufRead::read_line`]: a partial line may be left in `buf` when
    /// an error is returned, and `Ok(0)` means the device is gone.
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize>;

    /// Re-establishes the underlying device after read errors
    fn reconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

/// GPS receiver attached to a serial port
pub struct SerialLink {
    config: SerialConfig,
    reader: Option<BufReader<Box<dyn SerialPort>>>,
}

impl SerialLink {
    /// Opens the configured serial device.
    ///
    /// Failure here is fatal: without its receiver the server has nothing to serve.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = open_port(config)?;
        info!(
            device = %config.device,
            baud = config.baud_rate,
            timeout = ?config.read_timeout,
            "Opened GPS serial port"
        );
        Ok(SerialLink {
            config: config.clone(),
            reader: Some(BufReader::new(port)),
        })
    }
}

impl SentenceReader for SerialLink {
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        match self.reader.as_mut() {
            Some(reader) => reader.read_line(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "serial port closed")),
        }
    }

    fn reconnect(&mut self) -> Result<()> {
        // Ports are opened exclusively, so the old handle must go first
        self.reader = None;
        let port = open_port(&self.config)?;
        self.reader = Some(BufReader::new(port));
        debug!(device = %self.config.device, "Reopened GPS serial port");
        Ok(())
    }
}

fn open_port(config: &SerialConfig) -> Result<Box<dyn SerialPort>> {
    serialport::new(config.device.as_str(), config.baud_rate)
        .timeout(config.read_timeout)
        .open()
        .map_err(|e| Error::serial(format!("failed to open {}: {}", config.device, e)))
}
