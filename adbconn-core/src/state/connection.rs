//! Connection state machine for the debug socket.
//!
//! Provides a `ConnectionPhase` enum that models who owns the debugger's
//! byte stream at any moment, with validated transitions that return
//! `Result` instead of panicking.

use std::fmt;

use crate::control::HandoffDirective;
use crate::error::AdbConnError;

// ── Custody ──────────────────────────────────────────────────────

/// Where the debug socket stands once the agent is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Custody {
    /// No debugger connected.
    #[default]
    Vacant,

    /// A debugger is connected and only this process reads from it.
    Held { handshake_done: bool },

    /// Descriptors were sent; the agent has not acknowledged them yet.
    Sent { handshake_done: bool },

    /// The agent acknowledged the descriptors and drives the stream.
    Accepted { handshake_done: bool },
}

impl Custody {
    fn handshake_done(self) -> bool {
        match self {
            Custody::Vacant => false,
            Custody::Held { handshake_done }
            | Custody::Sent { handshake_done }
            | Custody::Accepted { handshake_done } => handshake_done,
        }
    }
}

// ── ConnectionPhase ──────────────────────────────────────────────

/// The current phase of the debugger connection.
///
/// ```text
///  NoClient ──► Handshaking ──► LocalHandling
///     ▲              │                │
///     └── close ─────┴────────────────┤
///                    │                │ escalate
///                    ▼                ▼
///        HandedOff { Vacant ⇄ Held ──► Sent ──► Accepted }
/// ```
///
/// Once the agent is loaded the phase never leaves `HandedOff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// Agent not loaded, no debugger connected.
    #[default]
    NoClient,

    /// Agent not loaded; waiting for the debugger's handshake bytes.
    Handshaking,

    /// Agent not loaded; handshake done, monitor packets handled here.
    LocalHandling,

    /// Agent loaded.
    HandedOff { listening: bool, custody: Custody },
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoClient => write!(f, "NoClient"),
            Self::Handshaking => write!(f, "Handshaking"),
            Self::LocalHandling => write!(f, "LocalHandling"),
            Self::HandedOff { custody, .. } => match custody {
                Custody::Vacant => write!(f, "HandedOff(vacant)"),
                Custody::Held { .. } => write!(f, "HandedOff(held)"),
                Custody::Sent { .. } => write!(f, "HandedOff(sent)"),
                Custody::Accepted { .. } => write!(f, "HandedOff(accepted)"),
            },
        }
    }
}

impl ConnectionPhase {
    pub fn agent_loaded(&self) -> bool {
        matches!(self, Self::HandedOff { .. })
    }

    pub fn agent_listening(&self) -> bool {
        matches!(self, Self::HandedOff { listening: true, .. })
    }

    /// Returns `true` while a debug socket is owned.
    pub fn has_client(&self) -> bool {
        !matches!(
            self,
            Self::NoClient
                | Self::HandedOff {
                    custody: Custody::Vacant,
                    ..
                }
        )
    }

    pub fn handshake_done(&self) -> bool {
        match self {
            Self::LocalHandling => true,
            Self::HandedOff { custody, .. } => custody.handshake_done(),
            Self::NoClient | Self::Handshaking => false,
        }
    }

    /// The agent holds the socket, whether or not it has acknowledged it.
    ///
    /// `Sent` counts, so `fds_sent()` always implies this, and a
    /// handshake report that overtakes `ACCEPT` is kept rather than lost.
    pub fn agent_has_socket(&self) -> bool {
        matches!(
            self,
            Self::HandedOff {
                custody: Custody::Sent { .. } | Custody::Accepted { .. },
                ..
            }
        )
    }

    pub fn fds_sent(&self) -> bool {
        matches!(
            self,
            Self::HandedOff {
                custody: Custody::Sent { .. },
                ..
            }
        )
    }

    /// This process still reads the debug socket itself.
    pub fn owns_stream(&self) -> bool {
        matches!(
            self,
            Self::Handshaking
                | Self::LocalHandling
                | Self::HandedOff {
                    custody: Custody::Held { .. },
                    ..
                }
        )
    }

    /// The directive to send if the socket should go to the agent now.
    pub fn pending_handoff(&self) -> Option<HandoffDirective> {
        match self {
            Self::HandedOff {
                listening: true,
                custody: Custody::Held { handshake_done },
            } => Some(HandoffDirective::for_connection(*handshake_done)),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// A new debug socket was accepted.
    ///
    /// Valid from: `NoClient`, `HandedOff { Vacant }`.
    pub fn client_connected(&mut self) -> Result<(), AdbConnError> {
        match *self {
            Self::NoClient => {
                *self = Self::Handshaking;
                Ok(())
            }
            Self::HandedOff {
                listening,
                custody: Custody::Vacant,
            } => {
                *self = Self::HandedOff {
                    listening,
                    custody: Custody::Held {
                        handshake_done: false,
                    },
                };
                Ok(())
            }
            _ => Err(AdbConnError::InvalidTransition(
                "cannot accept client: a debug socket is already owned",
            )),
        }
    }

    /// The handshake was answered locally.
    ///
    /// Valid from: `Handshaking`.
    pub fn handshake_completed(&mut self) -> Result<(), AdbConnError> {
        match self {
            Self::Handshaking => {
                *self = Self::LocalHandling;
                Ok(())
            }
            _ => Err(AdbConnError::InvalidTransition(
                "cannot complete handshake: not in Handshaking",
            )),
        }
    }

    /// The agent was attached to take over the current connection.
    ///
    /// Valid from: `Handshaking`, `LocalHandling`.
    pub fn escalated(&mut self) -> Result<(), AdbConnError> {
        let handshake_done = match self {
            Self::Handshaking => false,
            Self::LocalHandling => true,
            _ => {
                return Err(AdbConnError::InvalidTransition(
                    "cannot escalate: no locally handled client",
                ));
            }
        };
        *self = Self::HandedOff {
            listening: false,
            custody: Custody::Held { handshake_done },
        };
        Ok(())
    }

    /// The agent started or stopped listening for a socket.
    ///
    /// Valid from: `HandedOff`.
    pub fn set_listening(&mut self, value: bool) -> Result<(), AdbConnError> {
        match self {
            Self::HandedOff { listening, .. } => {
                *listening = value;
                Ok(())
            }
            _ => Err(AdbConnError::InvalidTransition(
                "agent control message before agent load",
            )),
        }
    }

    /// Descriptors for the held socket were sent to the agent.
    ///
    /// Valid from: `HandedOff { Held }`.
    pub fn fds_transferred(&mut self) -> Result<(), AdbConnError> {
        match self {
            Self::HandedOff {
                custody: custody @ Custody::Held { .. },
                ..
            } => {
                *custody = Custody::Sent {
                    handshake_done: custody.handshake_done(),
                };
                Ok(())
            }
            _ => Err(AdbConnError::InvalidTransition(
                "cannot send descriptors: socket not held",
            )),
        }
    }

    /// The agent reported the handshake done. Returns `false` when the
    /// agent does not hold the socket and the report was ignored.
    ///
    /// Valid from: `HandedOff`.
    pub fn agent_handshake_completed(&mut self) -> Result<bool, AdbConnError> {
        match self {
            Self::HandedOff {
                custody:
                    Custody::Sent { handshake_done } | Custody::Accepted { handshake_done },
                ..
            } => {
                *handshake_done = true;
                Ok(true)
            }
            Self::HandedOff { .. } => Ok(false),
            _ => Err(AdbConnError::InvalidTransition(
                "agent control message before agent load",
            )),
        }
    }

    /// The agent took the socket. It performs its own handshake, so the
    /// handshake flag is reset.
    ///
    /// Valid from: `HandedOff { Held | Sent | Accepted }`.
    pub fn agent_accepted(&mut self) -> Result<(), AdbConnError> {
        match self {
            Self::HandedOff {
                custody: custody @ (Custody::Held { .. } | Custody::Sent { .. } | Custody::Accepted { .. }),
                ..
            } => {
                *custody = Custody::Accepted {
                    handshake_done: false,
                };
                Ok(())
            }
            Self::HandedOff { .. } => Err(AdbConnError::InvalidTransition(
                "agent accepted with no debug socket",
            )),
            _ => Err(AdbConnError::InvalidTransition(
                "agent control message before agent load",
            )),
        }
    }

    /// The debug socket was closed. Always valid; the agent stays loaded.
    pub fn connection_closed(&mut self) {
        *self = match *self {
            Self::NoClient | Self::Handshaking | Self::LocalHandling => Self::NoClient,
            Self::HandedOff { listening, .. } => Self::HandedOff {
                listening,
                custody: Custody::Vacant,
            },
        };
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(listening: bool, custody: Custody) -> ConnectionPhase {
        ConnectionPhase::HandedOff { listening, custody }
    }

    #[test]
    fn local_lifecycle() {
        let mut phase = ConnectionPhase::default();
        assert!(!phase.has_client());

        phase.client_connected().unwrap();
        assert_eq!(phase, ConnectionPhase::Handshaking);
        assert!(phase.owns_stream());
        assert!(!phase.handshake_done());

        phase.handshake_completed().unwrap();
        assert!(phase.handshake_done());

        phase.connection_closed();
        assert_eq!(phase, ConnectionPhase::NoClient);
        assert!(!phase.handshake_done());
    }

    #[test]
    fn escalation_keeps_socket_and_handshake() {
        let mut phase = ConnectionPhase::LocalHandling;
        phase.escalated().unwrap();
        assert_eq!(
            phase,
            loaded(
                false,
                Custody::Held {
                    handshake_done: true
                }
            )
        );
        assert!(phase.owns_stream());
        assert_eq!(phase.pending_handoff(), None);

        phase.set_listening(true).unwrap();
        assert_eq!(
            phase.pending_handoff(),
            Some(HandoffDirective::SkipHandshake)
        );
    }

    #[test]
    fn escalation_from_handshaking_requires_handshake() {
        let mut phase = ConnectionPhase::Handshaking;
        phase.escalated().unwrap();
        phase.set_listening(true).unwrap();
        assert_eq!(
            phase.pending_handoff(),
            Some(HandoffDirective::PerformHandshake)
        );
    }

    #[test]
    fn handoff_then_accept_then_close() {
        let mut phase = loaded(
            true,
            Custody::Held {
                handshake_done: true,
            },
        );
        phase.fds_transferred().unwrap();
        assert!(phase.fds_sent());
        assert!(phase.agent_has_socket());
        assert!(!phase.owns_stream());
        assert!(phase.handshake_done());

        phase.agent_accepted().unwrap();
        assert!(!phase.fds_sent());
        assert!(phase.agent_has_socket());
        assert!(!phase.handshake_done());

        assert!(phase.agent_handshake_completed().unwrap());
        assert!(phase.handshake_done());

        phase.connection_closed();
        assert_eq!(phase, loaded(true, Custody::Vacant));
        assert!(!phase.has_client());
    }

    #[test]
    fn agent_handshake_ignored_without_socket() {
        let mut phase = loaded(
            true,
            Custody::Held {
                handshake_done: false,
            },
        );
        assert!(!phase.agent_handshake_completed().unwrap());
        assert!(!phase.handshake_done());
    }

    #[test]
    fn agent_handshake_before_accept_is_kept() {
        let mut phase = loaded(
            true,
            Custody::Sent {
                handshake_done: false,
            },
        );
        assert!(phase.agent_has_socket());
        assert!(phase.agent_handshake_completed().unwrap());
        assert!(phase.handshake_done());
        assert!(phase.fds_sent());
    }

    #[test]
    fn invalid_transitions() {
        assert!(ConnectionPhase::NoClient.escalated().is_err());
        assert!(ConnectionPhase::NoClient.set_listening(true).is_err());
        assert!(ConnectionPhase::LocalHandling.client_connected().is_err());
        assert!(ConnectionPhase::LocalHandling.handshake_completed().is_err());
        assert!(loaded(true, Custody::Vacant).fds_transferred().is_err());
        assert!(loaded(true, Custody::Vacant).agent_accepted().is_err());
        assert!(
            loaded(true, Custody::Sent { handshake_done: false })
                .client_connected()
                .is_err()
        );
        assert!(ConnectionPhase::Handshaking.agent_handshake_completed().is_err());
    }

    #[test]
    fn reconnect_after_handoff_starts_without_handshake() {
        let mut phase = loaded(true, Custody::Vacant);
        phase.client_connected().unwrap();
        assert_eq!(
            phase.pending_handoff(),
            Some(HandoffDirective::PerformHandshake)
        );
    }

    #[derive(Debug, Clone, Copy)]
    enum Event {
        NewClient,
        ListenStart,
        ListenEnd,
        HandshakeComplete,
        Accept,
        Close,
        Hangup,
    }

    const EVENTS: [Event; 7] = [
        Event::NewClient,
        Event::ListenStart,
        Event::ListenEnd,
        Event::HandshakeComplete,
        Event::Accept,
        Event::Close,
        Event::Hangup,
    ];

    /// Drive the phase the way the coordinator does, ignoring rejected
    /// transitions as it would.
    fn apply(phase: &mut ConnectionPhase, event: Event) {
        match event {
            Event::NewClient => {
                if !phase.has_client() && phase.client_connected().is_ok() {
                    if phase.pending_handoff().is_some() {
                        phase.fds_transferred().unwrap();
                    }
                }
            }
            Event::ListenStart => {
                phase.set_listening(true).unwrap();
                if phase.pending_handoff().is_some() {
                    phase.fds_transferred().unwrap();
                }
            }
            Event::ListenEnd => phase.set_listening(false).unwrap(),
            Event::HandshakeComplete => {
                let _ = phase.agent_handshake_completed().unwrap();
            }
            Event::Accept => {
                let _ = phase.agent_accepted();
            }
            Event::Close => phase.connection_closed(),
            Event::Hangup => {
                if phase.owns_stream() {
                    phase.connection_closed();
                }
            }
        }
    }

    fn check(phase: &ConnectionPhase) {
        if phase.fds_sent() {
            assert!(phase.agent_has_socket(), "{phase:?}");
            assert!(phase.has_client(), "{phase:?}");
        }
        if phase.agent_has_socket() {
            assert!(!phase.owns_stream(), "{phase:?}");
        }
        if !phase.has_client() {
            assert!(!phase.handshake_done(), "{phase:?}");
        }
    }

    #[test]
    fn sent_implies_held_by_agent_for_all_short_sequences() {
        let starts = [
            ConnectionPhase::Handshaking,
            ConnectionPhase::LocalHandling,
        ];
        for start in starts {
            let mut seq = [0usize; 5];
            loop {
                let mut phase = start;
                phase.escalated().unwrap();
                for &i in &seq {
                    apply(&mut phase, EVENTS[i]);
                    check(&phase);
                }

                // Odometer over every sequence of length 5.
                let mut pos = 0;
                while pos < seq.len() {
                    seq[pos] += 1;
                    if seq[pos] < EVENTS.len() {
                        break;
                    }
                    seq[pos] = 0;
                    pos += 1;
                }
                if pos == seq.len() {
                    break;
                }
            }
        }
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionPhase::NoClient.to_string(), "NoClient");
        assert_eq!(
            loaded(false, Custody::Sent { handshake_done: true }).to_string(),
            "HandedOff(sent)"
        );
    }
}
