//! The fixed 11-byte packet header.
//!
//! ```text
//! length:       u32 BE  (4)   header + body
//! id:           u32 BE  (4)
//! flags:        u8      (1)
//! command_set:  u8      (1)   error code high byte on replies
//! command:      u8      (1)   error code low byte on replies
//! ```
//!
//! The agent resumes on the same stream with the same framing, so this
//! layout must not change.

use crate::error::AdbConnError;
use crate::flags::PacketFlags;

pub const HEADER_SIZE: usize = 11;

pub type HeaderBytes = [u8; HEADER_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Total packet length, header included.
    pub length: u32,
    pub id: u32,
    pub flags: PacketFlags,
    pub command_set: u8,
    pub command: u8,
}

impl PacketHeader {
    pub fn command(length: u32, id: u32, command_set: u8, command: u8) -> Self {
        Self {
            length,
            id,
            flags: PacketFlags::empty(),
            command_set,
            command,
        }
    }

    pub fn reply(length: u32, id: u32, error_code: u16) -> Self {
        let [hi, lo] = error_code.to_be_bytes();
        Self {
            length,
            id,
            flags: PacketFlags::REPLY,
            command_set: hi,
            command: lo,
        }
    }

    pub fn to_bytes(&self) -> HeaderBytes {
        let mut buf: HeaderBytes = [0; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4..8].copy_from_slice(&self.id.to_be_bytes());
        buf[8] = self.flags.bits();
        buf[9] = self.command_set;
        buf[10] = self.command;
        buf
    }

    pub fn from_bytes(bytes: &HeaderBytes) -> Self {
        Self {
            length: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            id: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            flags: PacketFlags::from_bits_retain(bytes[8]),
            command_set: bytes[9],
            command: bytes[10],
        }
    }

    /// Parse the header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, AdbConnError> {
        let bytes: &HeaderBytes = data
            .get(..HEADER_SIZE)
            .and_then(|s| s.try_into().ok())
            .ok_or(AdbConnError::PacketTooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            })?;
        Ok(Self::from_bytes(bytes))
    }

    pub fn is_reply(&self) -> bool {
        self.flags.is_reply()
    }

    /// Error code of a reply packet. Meaningless on commands.
    pub fn error_code(&self) -> u16 {
        u16::from_be_bytes([self.command_set, self.command])
    }

    /// Length of the body that follows the header.
    pub fn body_len(&self) -> Result<usize, AdbConnError> {
        (self.length as usize)
            .checked_sub(HEADER_SIZE)
            .ok_or(AdbConnError::InvalidHeader("length smaller than header"))
    }
}
