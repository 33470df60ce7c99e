use std::time::Duration;

use bytes::{Buf, BufMut};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Size of an NTP header on the wire, without extension fields or MAC
pub const PACKET_SIZE: usize = 48;

/// Seconds from the NTP epoch (1900-01-01) to the Unix epoch (1970-01-01)
pub const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

/// Length of one 32-bit NTP era in seconds
const ERA_SECONDS: i64 = 1 << 32;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Leap indicator (2 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LeapIndicator {
    /// No leap second pending
    #[default]
    NoWarning = 0,
    /// Last minute of the day has 61 seconds
    AddSecond = 1,
    /// Last minute of the day has 59 seconds
    DeleteSecond = 2,
    /// Clock not synchronized
    Unsynchronized = 3,
}

impl LeapIndicator {
    /// Decodes the two low bits of `bits`
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => LeapIndicator::NoWarning,
            1 => LeapIndicator::AddSecond,
            2 => LeapIndicator::DeleteSecond,
            _ => LeapIndicator::Unsynchronized,
        }
    }

    /// Leap indicator from the numeric code used in configuration
    pub fn from_code(code: u8) -> Result<Self> {
        if code > 3 {
            return Err(Error::config(format!("leap indicator must be 0..=3, got {}", code)));
        }
        Ok(Self::from_bits(code))
    }
}

/// Association mode (3 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Reserved = 0,
    SymmetricActive = 1,
    SymmetricPassive = 2,
    Client = 3,
    Server = 4,
    Broadcast = 5,
    Control = 6,
    Private = 7,
}

impl Mode {
    /// Decodes the three low bits of `bits`
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x7 {
            0 => Mode::Reserved,
            1 => Mode::SymmetricActive,
            2 => Mode::SymmetricPassive,
            3 => Mode::Client,
            4 => Mode::Server,
            5 => Mode::Broadcast,
            6 => Mode::Control,
            _ => Mode::Private,
        }
    }
}

/// 64-bit NTP timestamp: seconds since 1900 and a 32-bit binary fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NtpTimestamp {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTimestamp {
    /// The all-zero timestamp, meaning "unknown"
    pub const ZERO: NtpTimestamp = NtpTimestamp { seconds: 0, fraction: 0 };

    /// Converts a UTC instant, keeping the full 32-bit fraction.
    ///
    /// Leap-second nanos (>= 1s) fold into the last representable fraction.
    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        let seconds = (time.timestamp() + NTP_UNIX_OFFSET).rem_euclid(ERA_SECONDS) as u32;
        let nanos = u64::from(time.timestamp_subsec_nanos()).min(NANOS_PER_SEC - 1);
        NtpTimestamp {
            seconds,
            fraction: ((nanos << 32) / NANOS_PER_SEC) as u32,
        }
    }

    /// Converts back to UTC.
    ///
    /// Timestamps with the top bit of `seconds` clear are taken to be in era 1
    /// (February 2036 onward), the rest in era 0.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let era = if self.seconds & 0x8000_0000 == 0 { 1 } else { 0 };
        let unix = era * ERA_SECONDS + i64::from(self.seconds) - NTP_UNIX_OFFSET;
        let nanos = (u64::from(self.fraction) * NANOS_PER_SEC) >> 32;
        Utc.timestamp_opt(unix, nanos as u32).single()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

/// 32-bit NTP short format: unsigned 16.16 fixed-point seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ShortFormat(pub u32);

impl ShortFormat {
    /// Fixed-point value of `duration`, saturating at the largest representable value
    pub fn from_duration(duration: Duration) -> Self {
        let scaled = (duration.as_nanos() << 16) / u128::from(NANOS_PER_SEC);
        ShortFormat(u32::try_from(scaled).unwrap_or(u32::MAX))
    }

    pub fn to_duration(&self) -> Duration {
        let nanos = (u64::from(self.0) * NANOS_PER_SEC) >> 16;
        Duration::from_nanos(nanos)
    }
}

/// One NTP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpPacket {
    pub leap_indicator: LeapIndicator,
    pub version: u8,
    pub mode: Mode,
    pub stratum: u8,
    /// Poll interval, log2 seconds
    pub poll: i8,
    /// Clock precision, log2 seconds
    pub precision: i8,
    pub root_delay: ShortFormat,
    pub root_dispersion: ShortFormat,
    pub reference_id: [u8; 4],
    pub reference_timestamp: NtpTimestamp,
    pub origin_timestamp: NtpTimestamp,
    pub receive_timestamp: NtpTimestamp,
    pub transmit_timestamp: NtpTimestamp,
}

impl Default for NtpPacket {
    fn default() -> Self {
        NtpPacket {
            leap_indicator: LeapIndicator::NoWarning,
            version: crate::core::NTP_VERSION,
            mode: Mode::Client,
            stratum: 0,
            poll: 0,
            precision: 0,
            root_delay: ShortFormat::default(),
            root_dispersion: ShortFormat::default(),
            reference_id: [0; 4],
            reference_timestamp: NtpTimestamp::ZERO,
            origin_timestamp: NtpTimestamp::ZERO,
            receive_timestamp: NtpTimestamp::ZERO,
            transmit_timestamp: NtpTimestamp::ZERO,
        }
    }
}

impl NtpPacket {
    /// Decodes the first 48 bytes of `buf`.
    ///
    /// Any version and mode is accepted; anything past the header is ignored.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < PACKET_SIZE {
            return Err(Error::TruncatedPacket { len: buf.len() });
        }

        let li_vn_mode = buf.get_u8();
        Ok(NtpPacket {
            leap_indicator: LeapIndicator::from_bits(li_vn_mode >> 6),
            version: (li_vn_mode >> 3) & 0x7,
            mode: Mode::from_bits(li_vn_mode),
            stratum: buf.get_u8(),
            poll: buf.get_i8(),
            precision: buf.get_i8(),
            root_delay: ShortFormat(buf.get_u32()),
            root_dispersion: ShortFormat(buf.get_u32()),
            reference_id: {
                let mut id = [0u8; 4];
                buf.copy_to_slice(&mut id);
                id
            },
            reference_timestamp: get_timestamp(&mut buf),
            origin_timestamp: get_timestamp(&mut buf),
            receive_timestamp: get_timestamp(&mut buf),
            transmit_timestamp: get_timestamp(&mut buf),
        })
    }

    /// Decodes a request, rejecting modes this server never answers.
    pub fn decode_request(buf: &[u8]) -> Result<Self> {
        let packet = Self::decode(buf)?;
        match packet.mode {
            Mode::Client | Mode::SymmetricActive => Ok(packet),
            other => Err(Error::UnsupportedMode(other as u8)),
        }
    }

    /// Appends the 48-byte wire form to `dst`
    pub fn encode_into<B: BufMut>(&self, dst: &mut B) {
        let li_vn_mode = ((self.leap_indicator as u8) << 6) | ((self.version & 0x7) << 3);
        dst.put_u8(li_vn_mode | self.mode as u8);
        dst.put_u8(self.stratum);
        dst.put_i8(self.poll);
        dst.put_i8(self.precision);
        dst.put_u32(self.root_delay.0);
        dst.put_u32(self.root_dispersion.0);
        dst.put_slice(&self.reference_id);
        for ts in [
            self.reference_timestamp,
            self.origin_timestamp,
            self.receive_timestamp,
            self.transmit_timestamp,
        ] {
            dst.put_u32(ts.seconds);
            dst.put_u32(ts.fraction);
        }
    }

    /// The 48-byte wire form
    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut out = [0u8; PACKET_SIZE];
        self.encode_into(&mut &mut out[..]);
        out
    }
}

fn get_timestamp(buf: &mut &[u8]) -> NtpTimestamp {
    NtpTimestamp {
        seconds: buf.get_u32(),
        fraction: buf.get_u32(),
    }
}
