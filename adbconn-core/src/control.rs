//! Control-channel vocabulary between the coordinator and the agent.
//!
//! Tokens are fixed ASCII strings sent NUL-terminated, one per
//! `SOCK_SEQPACKET` message. Uses `TryFrom` with a typed error for
//! unknown tokens.

use std::fmt;

use crate::error::AdbConnError;

/// Largest control message the coordinator reads in one receive.
pub const MAX_CONTROL_MESSAGE: usize = 256;

// ── ControlMessage ───────────────────────────────────────────────

/// Readiness transitions reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlMessage {
    /// The agent is ready to receive the debug socket.
    ListenStart,
    /// The agent stopped waiting for a socket.
    ListenEnd,
    /// The agent finished the wire handshake on the socket it holds.
    HandshakeComplete,
    /// The agent closed its copies of the debug socket.
    Close,
    /// The agent took the descriptors it was sent.
    Accept,
}

impl ControlMessage {
    pub const fn token(self) -> &'static str {
        match self {
            ControlMessage::ListenStart => "dt_fd_forward:START-LISTEN",
            ControlMessage::ListenEnd => "dt_fd_forward:END-LISTEN",
            ControlMessage::HandshakeComplete => "dt_fd_forward:HANDSHAKE-COMPLETE",
            ControlMessage::Close => "dt_fd_forward:CLOSING",
            ControlMessage::Accept => "dt_fd_forward:ACCEPTED",
        }
    }

    /// The token as sent on the wire, NUL included.
    pub fn to_wire(self) -> Vec<u8> {
        nul_terminated(self.token())
    }
}

impl TryFrom<&[u8]> for ControlMessage {
    type Error = AdbConnError;

    fn try_from(raw: &[u8]) -> Result<Self, Self::Error> {
        let end = raw
            .iter()
            .rposition(|&b| b != 0 && b != b'\n')
            .map_or(0, |i| i + 1);
        let text = &raw[..end];
        [
            ControlMessage::ListenStart,
            ControlMessage::ListenEnd,
            ControlMessage::HandshakeComplete,
            ControlMessage::Close,
            ControlMessage::Accept,
        ]
        .into_iter()
        .find(|m| m.token().as_bytes() == text)
        .ok_or_else(|| AdbConnError::UnknownControlMessage(String::from_utf8_lossy(text).into()))
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

// ── HandoffDirective ─────────────────────────────────────────────

/// Sent to the agent together with the debug socket descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffDirective {
    /// The debugger has not handshaken on this connection yet.
    PerformHandshake,
    /// The handshake already happened; the agent starts at packet framing.
    SkipHandshake,
}

impl HandoffDirective {
    pub fn for_connection(handshake_done: bool) -> Self {
        if handshake_done {
            HandoffDirective::SkipHandshake
        } else {
            HandoffDirective::PerformHandshake
        }
    }

    pub const fn token(self) -> &'static str {
        match self {
            HandoffDirective::PerformHandshake => "HANDSHAKE:REQD",
            HandoffDirective::SkipHandshake => "HANDSHAKE:SKIP",
        }
    }

    pub fn to_wire(self) -> Vec<u8> {
        nul_terminated(self.token())
    }
}

impl fmt::Display for HandoffDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

fn nul_terminated(token: &str) -> Vec<u8> {
    let mut wire = Vec::with_capacity(token.len() + 1);
    wire.extend_from_slice(token.as_bytes());
    wire.push(0);
    wire
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_token_from_its_wire_form() {
        for msg in [
            ControlMessage::ListenStart,
            ControlMessage::ListenEnd,
            ControlMessage::HandshakeComplete,
            ControlMessage::Close,
            ControlMessage::Accept,
        ] {
            assert_eq!(ControlMessage::try_from(&msg.to_wire()[..]).unwrap(), msg);
        }
    }

    #[test]
    fn tolerates_missing_or_extra_terminators() {
        let bare = b"dt_fd_forward:ACCEPTED";
        assert_eq!(
            ControlMessage::try_from(&bare[..]).unwrap(),
            ControlMessage::Accept
        );
        let padded = b"dt_fd_forward:CLOSING\n\0\0";
        assert_eq!(
            ControlMessage::try_from(&padded[..]).unwrap(),
            ControlMessage::Close
        );
    }

    #[test]
    fn rejects_prefixes_and_unknown_tokens() {
        assert!(ControlMessage::try_from(&b"dt_fd_forward:START"[..]).is_err());
        assert!(ControlMessage::try_from(&b""[..]).is_err());
        let err = ControlMessage::try_from(&b"hello\0"[..]).unwrap_err();
        assert!(err.to_string().contains("hello"));
    }

    #[test]
    fn directive_follows_handshake_state() {
        assert_eq!(
            HandoffDirective::for_connection(true),
            HandoffDirective::SkipHandshake
        );
        assert_eq!(
            HandoffDirective::for_connection(false).to_wire(),
            b"HANDSHAKE:REQD\0"
        );
    }
}
