use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::trace;

use crate::core::{
    Error, NtpConfig, Result, REFERENCE_ID_GPS, STRATUM_PRIMARY, STRATUM_UNSYNCHRONIZED,
};
use crate::time::{ClockState, ReferenceClock};
use super::message::{LeapIndicator, Mode, NtpPacket, NtpTimestamp, ShortFormat, PACKET_SIZE};

/// Request modes this server answers
///
/// Everything else is dropped without a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Mode 3, answered in mode 4
    Client,
    /// Mode 1, answered in mode 2 without keeping peer state
    SymmetricActive,
}

impl RequestMode {
    /// Maps a wire mode onto an answerable request mode
    pub fn classify(mode: Mode) -> Result<Self> {
        match mode {
            Mode::Client => Ok(RequestMode::Client),
            Mode::SymmetricActive => Ok(RequestMode::SymmetricActive),
            other => Err(Error::UnsupportedMode(other as u8)),
        }
    }

    /// Mode written into the reply
    pub fn reply_mode(&self) -> Mode {
        match self {
            RequestMode::Client => Mode::Server,
            RequestMode::SymmetricActive => Mode::SymmetricPassive,
        }
    }
}

/// Per-request NTP state machine
///
/// Holds only configuration and a handle to the clock; each request is answered
/// from a single clock snapshot and nothing survives between requests.
#[derive(Clone)]
pub struct Responder {
    clock: Arc<ReferenceClock>,
    poll: i8,
    precision: i8,
    leap_indicator: LeapIndicator,
}

impl Responder {
    pub fn new(clock: Arc<ReferenceClock>, config: &NtpConfig) -> Self {
        Responder {
            clock,
            poll: config.poll,
            precision: config.precision,
            leap_indicator: config.leap_indicator,
        }
    }

    /// Shared clock this responder reads
    pub fn clock(&self) -> &Arc<ReferenceClock> {
        &self.clock
    }

    /// Parses a datagram received at `received_at` and prepares the reply.
    pub fn receive(&self, datagram: &[u8], received_at: Instant) -> Result<PendingReply> {
        let request = NtpPacket::decode_request(datagram)?;
        self.respond(&request, received_at)
    }

    /// Prepares the reply to an already decoded request.
    ///
    /// The receive timestamp is taken here; the transmit timestamp is left for
    /// [`PendingReply::finalize`].
    pub fn respond(&self, request: &NtpPacket, received_at: Instant) -> Result<PendingReply> {
        let mode = RequestMode::classify(request.mode)?;
        let snapshot = self.clock.snapshot();

        let parsed_at = Instant::now();
        let receive = Stamp::read(&snapshot, parsed_at);
        trace!(
            mode = ?mode,
            queued = ?parsed_at.saturating_duration_since(received_at),
            synchronized = receive.synchronized,
            "Request parsed"
        );

        let (stratum, leap_indicator, root_dispersion) = if receive.synchronized {
            (STRATUM_PRIMARY, self.leap_indicator, receive.dispersion)
        } else {
            (
                STRATUM_UNSYNCHRONIZED,
                LeapIndicator::Unsynchronized,
                receive.dispersion.max(snapshot.unsynchronized_dispersion()),
            )
        };

        let reference_timestamp = snapshot
            .sample()
            .map(|sample| NtpTimestamp::from_datetime(sample.reference_instant))
            .unwrap_or(NtpTimestamp::ZERO);

        let packet = NtpPacket {
            leap_indicator,
            version: request.version,
            mode: mode.reply_mode(),
            stratum,
            poll: self.poll,
            precision: self.precision,
            root_delay: ShortFormat::default(),
            root_dispersion: ShortFormat::from_duration(root_dispersion),
            reference_id: REFERENCE_ID_GPS,
            reference_timestamp,
            origin_timestamp: request.transmit_timestamp,
            receive_timestamp: receive.timestamp,
            transmit_timestamp: NtpTimestamp::ZERO,
        };

        Ok(PendingReply { packet, snapshot })
    }

    /// Answers one datagram in full, returning the reply bytes.
    pub fn handle(&self, datagram: &[u8], received_at: Instant) -> Result<[u8; PACKET_SIZE]> {
        Ok(self.receive(datagram, received_at)?.finalize())
    }
}

/// Reply waiting for its transmit timestamp
#[derive(Debug)]
pub struct PendingReply {
    packet: NtpPacket,
    snapshot: Arc<ClockState>,
}

impl PendingReply {
    /// Stamps the transmit time and returns the finished packet.
    ///
    /// Reads the same snapshot the receive timestamp came from, so both
    /// timestamps describe one sample.
    pub fn finalize_packet(mut self) -> NtpPacket {
        self.packet.transmit_timestamp = Stamp::read(&self.snapshot, Instant::now()).timestamp;
        self.packet
    }

    /// Stamps the transmit time and encodes the reply
    pub fn finalize(self) -> [u8; PACKET_SIZE] {
        self.finalize_packet().encode()
    }
}

/// One best-effort clock reading in wire form
struct Stamp {
    timestamp: NtpTimestamp,
    dispersion: Duration,
    synchronized: bool,
}

impl Stamp {
    fn read(snapshot: &ClockState, local: Instant) -> Self {
        match snapshot.read_at(local) {
            Ok(reading) => Stamp {
                timestamp: NtpTimestamp::from_datetime(reading.time),
                dispersion: reading.dispersion,
                synchronized: reading.synchronized,
            },
            // No sample yet: system time, flagged unsynchronized
            Err(_) => Stamp {
                timestamp: NtpTimestamp::from_datetime(Utc::now()),
                dispersion: snapshot.unsynchronized_dispersion(),
                synchronized: false,
            },
        }
    }
}
