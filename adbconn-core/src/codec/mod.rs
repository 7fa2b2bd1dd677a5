//! `tokio_util` framing for whole packets.
//!
//! Used on the debugger side of a connection, after the handshake bytes
//! have been exchanged raw.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::AdbConnError;
use crate::header::{HEADER_SIZE, PacketHeader};
use crate::packet::{MAX_PACKET_SIZE, Packet};

#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = AdbConnError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }
        let header = PacketHeader::parse(&src[..])?;
        let length = HEADER_SIZE + header.body_len()?;
        if length > MAX_PACKET_SIZE {
            return Err(AdbConnError::PacketTooLarge {
                size: length,
                max: MAX_PACKET_SIZE,
            });
        }
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let frame = src.split_to(length);
        let mut body = frame.freeze();
        body.advance(HEADER_SIZE);
        Packet::new(header, body).map(Some)
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = AdbConnError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(HEADER_SIZE + item.body().len());
        dst.extend_from_slice(&item.header().to_bytes());
        dst.extend_from_slice(item.body());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Chunk;

    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    fn helo(id: u32, payload: &'static [u8]) -> Packet {
        Packet::monitor_command(id, &Chunk::new(Chunk::fourcc(b"HELO"), payload)).unwrap()
    }

    #[test]
    fn waits_for_full_packet() {
        let bytes = helo(1, b"payload").to_bytes();
        let mut codec = PacketCodec;
        let mut buf = BytesMut::from(&bytes[..bytes.len() - 3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[bytes.len() - 3..]);
        let pkt = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(pkt.id(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_undersized_length() {
        let mut buf = BytesMut::from(&PacketHeader::command(4, 1, 1, 1).to_bytes()[..]);
        assert!(matches!(
            PacketCodec.decode(&mut buf),
            Err(AdbConnError::InvalidHeader(_))
        ));
    }

    #[test]
    fn rejects_oversized_length() {
        let header = PacketHeader::command((MAX_PACKET_SIZE + 1) as u32, 1, 1, 1);
        let mut buf = BytesMut::from(&header.to_bytes()[..]);
        assert!(matches!(
            PacketCodec.decode(&mut buf),
            Err(AdbConnError::PacketTooLarge { .. })
        ));
    }

    #[test]
    fn encode_matches_to_bytes() {
        let pkt = helo(5, b"x");
        let mut dst = BytesMut::new();
        PacketCodec.encode(pkt.clone(), &mut dst).unwrap();
        assert_eq!(&dst[..], &pkt.to_bytes()[..]);
    }

    #[tokio::test]
    async fn frames_back_to_back_packets_from_a_stream() {
        let first = helo(1, b"one").to_bytes();
        let second = helo(2, b"second").to_bytes();
        let reader = tokio_test::io::Builder::new()
            .read(&first[..7])
            .read(&[&first[7..], &second[..]].concat())
            .build();

        let mut frames = FramedRead::new(reader, PacketCodec);
        let a = frames.next().await.unwrap().unwrap();
        let b = frames.next().await.unwrap().unwrap();
        assert_eq!(a.chunk().unwrap().payload.as_ref(), b"one");
        assert_eq!(b.id(), 2);
        assert!(frames.next().await.is_none());
    }
}
