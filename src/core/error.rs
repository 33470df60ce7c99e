use std::io;
use thiserror::Error;

/// Error types for the GPS NTP server
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("NMEA checksum mismatch: sentence says {expected:02X}, computed {computed:02X}")]
    Checksum { expected: u8, computed: u8 },

    #[error("Malformed NMEA field {field}: {value:?}")]
    MalformedField { field: &'static str, value: String },

    #[error("Incomplete NMEA sentence: {0}")]
    IncompleteSentence(String),

    #[error("Unsupported NMEA sentence: {0}")]
    UnsupportedSentence(String),

    #[error("Serial I/O error: {0}")]
    SerialIo(String),

    #[error("Reference clock is unsynchronized")]
    Unsynchronized,

    #[error("Truncated NTP packet: {len} bytes")]
    TruncatedPacket { len: usize },

    #[error("Unsupported NTP mode: {0}")]
    UnsupportedMode(u8),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new malformed field error
    pub fn malformed(field: &'static str, value: impl Into<String>) -> Self {
        Error::MalformedField {
            field,
            value: value.into(),
        }
    }

    /// Creates a new incomplete sentence error
    pub fn incomplete(msg: impl Into<String>) -> Self {
        Error::IncompleteSentence(msg.into())
    }

    /// Creates a new unsupported sentence error
    pub fn unsupported_sentence(id: impl Into<String>) -> Self {
        Error::UnsupportedSentence(id.into())
    }

    /// Creates a new serial I/O error
    pub fn serial(msg: impl Into<String>) -> Self {
        Error::SerialIo(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new network error
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network(msg.into())
    }

    /// Whether the error only costs one sentence or one datagram.
    ///
    /// Recoverable errors are dropped and counted by the loop that hit them;
    /// everything else ends startup or the unit of execution.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Checksum { .. }
                | Error::MalformedField { .. }
                | Error::IncompleteSentence(_)
                | Error::UnsupportedSentence(_)
                | Error::Unsynchronized
                | Error::TruncatedPacket { .. }
                | Error::UnsupportedMode(_)
        )
    }
}

impl From<serialport::Error> for Error {
    fn from(e: serialport::Error) -> Self {
        Error::SerialIo(e.to_string())
    }
}
