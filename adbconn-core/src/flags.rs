use bitflags::bitflags;

bitflags! {
    /// The flags byte of a packet header.
    ///
    /// Only the reply bit is defined; unknown bits are preserved so a
    /// header read off the wire re-encodes byte for byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u8 {
        /// Set on replies, clear on commands.
        const REPLY = 0x80;

        const _ = !0;
    }
}

impl PacketFlags {
    pub fn is_reply(self) -> bool {
        self.contains(PacketFlags::REPLY)
    }
}
