//! Whole packets and the monitor-chunk sub-format.
//!
//! A monitor packet is a command (set 199, command 1) or reply whose
//! body starts with an 8-byte chunk header:
//!
//! ```text
//! chunk_type:   u32 BE  (4)
//! chunk_len:    u32 BE  (4)
//! payload:      [u8]    (chunk_len)
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::AdbConnError;
use crate::header::{HEADER_SIZE, PacketHeader};

/// Sent by the debugger before any packet and echoed back unchanged.
pub const HANDSHAKE: &[u8; 14] = b"JDWP-Handshake";

/// Command set of the locally handled packet family.
pub const MONITOR_COMMAND_SET: u8 = 199;
/// Command of the locally handled packet family.
pub const MONITOR_COMMAND: u8 = 1;

pub const CHUNK_HEADER_SIZE: usize = 8;

/// Bytes that precede the chunk payload in a monitor packet.
pub const MONITOR_PREFIX_SIZE: usize = HEADER_SIZE + CHUNK_HEADER_SIZE;

/// Largest packet `PacketCodec` will frame.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

// ── Chunk ────────────────────────────────────────────────────────

/// A typed diagnostic payload carried by a monitor packet.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_type: u32,
    pub payload: Bytes,
}

impl Chunk {
    pub fn new(chunk_type: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            chunk_type,
            payload: payload.into(),
        }
    }

    /// Build a chunk type from its four-character code, e.g. `b"HELO"`.
    pub const fn fourcc(code: &[u8; 4]) -> u32 {
        u32::from_be_bytes(*code)
    }

    /// Decode the chunk carried in a monitor packet body.
    ///
    /// Returns `None` for a body too short for the chunk header or a
    /// declared length that overruns the body. Bytes past the declared
    /// length are ignored.
    pub fn decode(mut body: &[u8]) -> Option<Self> {
        if body.len() < CHUNK_HEADER_SIZE {
            return None;
        }
        let chunk_type = body.get_u32();
        let len = body.get_u32() as usize;
        if len > body.len() {
            return None;
        }
        Some(Self::new(chunk_type, Bytes::copy_from_slice(&body[..len])))
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("type", &TypeName(self.chunk_type))
            .field("len", &self.payload.len())
            .finish()
    }
}

/// Displays a chunk type as its four-character code.
#[derive(Clone, Copy)]
pub struct TypeName(pub u32);

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.to_be_bytes() {
            let c = if b.is_ascii_graphic() { b as char } else { '?' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Encode the 19-byte prefix (packet header + chunk header) of a
/// monitor packet whose payload is `payload_len` bytes.
///
/// Kept separate from the payload so callers can `writev` both without
/// copying.
pub fn encode_monitor_prefix(
    id: u32,
    reply: bool,
    chunk_type: u32,
    payload_len: usize,
) -> Result<[u8; MONITOR_PREFIX_SIZE], AdbConnError> {
    let too_large = || AdbConnError::PacketTooLarge {
        size: MONITOR_PREFIX_SIZE.saturating_add(payload_len),
        max: u32::MAX as usize,
    };
    let chunk_len = u32::try_from(payload_len).map_err(|_| too_large())?;
    let total = chunk_len
        .checked_add(MONITOR_PREFIX_SIZE as u32)
        .ok_or_else(too_large)?;

    let header = if reply {
        PacketHeader::reply(total, id, 0)
    } else {
        PacketHeader::command(total, id, MONITOR_COMMAND_SET, MONITOR_COMMAND)
    };

    let mut prefix = [0u8; MONITOR_PREFIX_SIZE];
    let mut buf = &mut prefix[..];
    buf.put_slice(&header.to_bytes());
    buf.put_u32(chunk_type);
    buf.put_u32(chunk_len);
    Ok(prefix)
}

// ── Packet ───────────────────────────────────────────────────────

/// A complete packet: header plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: PacketHeader,
    body: Bytes,
}

impl Packet {
    /// Build a packet, computing the length field from the body.
    pub fn new(mut header: PacketHeader, body: impl Into<Bytes>) -> Result<Self, AdbConnError> {
        let body = body.into();
        let size = HEADER_SIZE + body.len();
        if size > MAX_PACKET_SIZE {
            return Err(AdbConnError::PacketTooLarge {
                size,
                max: MAX_PACKET_SIZE,
            });
        }
        header.length = size as u32;
        Ok(Self { header, body })
    }

    /// A monitor command packet carrying `chunk`.
    pub fn monitor_command(id: u32, chunk: &Chunk) -> Result<Self, AdbConnError> {
        Self::monitor(id, false, chunk)
    }

    /// A monitor reply packet carrying `chunk`.
    pub fn monitor_reply(id: u32, chunk: &Chunk) -> Result<Self, AdbConnError> {
        Self::monitor(id, true, chunk)
    }

    fn monitor(id: u32, reply: bool, chunk: &Chunk) -> Result<Self, AdbConnError> {
        let prefix = encode_monitor_prefix(id, reply, chunk.chunk_type, chunk.payload.len())?;
        let mut body = BytesMut::with_capacity(CHUNK_HEADER_SIZE + chunk.payload.len());
        body.put_slice(&prefix[HEADER_SIZE..]);
        body.put_slice(&chunk.payload);
        Self::new(PacketHeader::parse(&prefix)?, body.freeze())
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn id(&self) -> u32 {
        self.header.id
    }

    /// `true` for command packets of the locally handled family.
    pub fn is_monitor_command(&self) -> bool {
        !self.header.is_reply()
            && self.header.command_set == MONITOR_COMMAND_SET
            && self.header.command == MONITOR_COMMAND
    }

    /// The chunk carried by this packet, if the body is well formed.
    pub fn chunk(&self) -> Option<Chunk> {
        Chunk::decode(&self.body)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.body.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse exactly one packet from `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AdbConnError> {
        let header = PacketHeader::parse(bytes)?;
        let expected = HEADER_SIZE + header.body_len()?;
        if bytes.len() != expected {
            return Err(AdbConnError::PacketTooShort {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            header,
            body: Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELO: u32 = Chunk::fourcc(b"HELO");

    #[test]
    fn fourcc_display() {
        assert_eq!(TypeName(HELO).to_string(), "HELO");
        assert_eq!(TypeName(0x0041_4243).to_string(), "?ABC");
    }

    #[test]
    fn monitor_prefix_layout() {
        let prefix = encode_monitor_prefix(0x8000_0001, false, HELO, 4).unwrap();
        assert_eq!(&prefix[0..4], &23u32.to_be_bytes());
        assert_eq!(&prefix[4..8], &0x8000_0001u32.to_be_bytes());
        assert_eq!(prefix[8], 0);
        assert_eq!(prefix[9], MONITOR_COMMAND_SET);
        assert_eq!(prefix[10], MONITOR_COMMAND);
        assert_eq!(&prefix[11..15], b"HELO");
        assert_eq!(&prefix[15..19], &4u32.to_be_bytes());
    }

    #[test]
    fn reply_prefix_has_reply_flag_and_zero_error() {
        let prefix = encode_monitor_prefix(42, true, HELO, 0).unwrap();
        let header = PacketHeader::parse(&prefix).unwrap();
        assert!(header.is_reply());
        assert_eq!(header.error_code(), 0);
        assert_eq!(header.length as usize, MONITOR_PREFIX_SIZE);
    }

    #[test]
    fn monitor_reply_length_counts_everything() {
        let chunk = Chunk::new(HELO, b"abcde".to_vec());
        let pkt = Packet::monitor_reply(9, &chunk).unwrap();
        assert_eq!(pkt.header().length as usize, HEADER_SIZE + 8 + 5);
        assert_eq!(pkt.id(), 9);
        assert_eq!(pkt.chunk().unwrap(), chunk);
        assert!(!pkt.is_monitor_command());
    }

    #[test]
    fn decode_rejects_short_body() {
        assert!(Chunk::decode(&[0, 0, 0, 1, 0, 0, 0]).is_none());
    }

    #[test]
    fn decode_rejects_overrunning_length() {
        let mut body = Vec::new();
        body.extend_from_slice(&HELO.to_be_bytes());
        body.extend_from_slice(&10u32.to_be_bytes());
        body.extend_from_slice(b"short");
        assert!(Chunk::decode(&body).is_none());
    }

    #[test]
    fn decode_accepts_empty_payload_and_ignores_trailing_bytes() {
        let mut body = Vec::new();
        body.extend_from_slice(&HELO.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(b"junk");
        let chunk = Chunk::decode(&body).unwrap();
        assert_eq!(chunk.chunk_type, HELO);
        assert!(chunk.payload.is_empty());
    }

    #[test]
    fn from_bytes_checks_declared_length() {
        let chunk = Chunk::new(HELO, b"xy".to_vec());
        let bytes = Packet::monitor_command(3, &chunk).unwrap().to_bytes();
        assert!(Packet::from_bytes(&bytes[..bytes.len() - 1]).is_err());

        let parsed = Packet::from_bytes(&bytes).unwrap();
        assert!(parsed.is_monitor_command());
        assert_eq!(parsed.chunk().unwrap().payload.as_ref(), b"xy");
    }
}
