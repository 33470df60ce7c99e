//! NTP protocol implementation module
//!
//! This module defines the NTP packet layout, its datagram codec, and the
//! stateless responder that turns requests into replies.

pub mod codec;
pub mod message;
pub mod state;

pub use self::codec::NtpCodec;
pub use self::message::{
    LeapIndicator, Mode, NtpPacket, NtpTimestamp, ShortFormat, NTP_UNIX_OFFSET, PACKET_SIZE,
};
pub use self::state::{PendingReply, RequestMode, Responder};

/// Largest datagram read from the socket (header plus extension fields)
pub const MAX_DATAGRAM_SIZE: usize = 1024;
