use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::core::Error;
use super::message::{NtpPacket, PACKET_SIZE};

/// Datagram codec for NTP requests and replies
///
/// One datagram carries one packet, so decoding consumes the whole buffer once a
/// full header is present. Extension fields and MACs trailing the header are discarded.
#[derive(Debug, Clone, Default)]
pub struct NtpCodec;

impl NtpCodec {
    /// Creates a new packet codec
    pub fn new() -> Self {
        NtpCodec
    }
}

impl Decoder for NtpCodec {
    type Item = NtpPacket;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PACKET_SIZE {
            return Ok(None);
        }

        let decoded = NtpPacket::decode_request(&src[..]);
        src.clear();
        decoded.map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => {
                let len = src.len();
                src.clear();
                Err(Error::TruncatedPacket { len })
            }
        }
    }
}

impl Encoder<NtpPacket> for NtpCodec {
    type Error = Error;

    fn encode(&mut self, item: NtpPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(PACKET_SIZE);
        item.encode_into(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Mode, NtpTimestamp};

    fn request(mode: Mode) -> NtpPacket {
        NtpPacket {
            mode,
            transmit_timestamp: NtpTimestamp { seconds: 0xDEAD_BEEF, fraction: 0x1234_5678 },
            ..NtpPacket::default()
        }
    }

    #[test]
    fn test_codec_client_request() {
        let mut codec = NtpCodec::new();
        let mut bytes = BytesMut::new();

        let message = request(Mode::Client);
        codec.encode(message, &mut bytes).unwrap();
        assert_eq!(bytes.len(), PACKET_SIZE);

        let decoded = codec.decode(&mut bytes).unwrap().expect("full packet");
        assert_eq!(decoded, message);
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_codec_waits_for_full_header() {
        let mut codec = NtpCodec::new();
        let mut bytes = BytesMut::from(&request(Mode::Client).encode()[..20]);

        assert!(codec.decode(&mut bytes).unwrap().is_none());
        assert_eq!(bytes.len(), 20);
        assert!(matches!(
            codec.decode_eof(&mut bytes),
            Err(Error::TruncatedPacket { len: 20 })
        ));
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_codec_discards_extension_fields() {
        let mut codec = NtpCodec::new();
        let mut bytes = BytesMut::new();
        codec.encode(request(Mode::SymmetricActive), &mut bytes).unwrap();
        bytes.extend_from_slice(&[0xAA; 20]);

        let decoded = codec.decode(&mut bytes).unwrap().expect("full packet");
        assert_eq!(decoded.mode, Mode::SymmetricActive);
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_codec_rejects_unanswerable_modes() {
        let mut codec = NtpCodec::new();
        for mode in [Mode::Server, Mode::Broadcast, Mode::SymmetricPassive, Mode::Control] {
            let mut bytes = BytesMut::new();
            codec.encode(request(mode), &mut bytes).unwrap();
            assert!(matches!(
                codec.decode(&mut bytes),
                Err(Error::UnsupportedMode(m)) if m == mode as u8
            ));
            assert!(bytes.is_empty());
        }
    }
}
