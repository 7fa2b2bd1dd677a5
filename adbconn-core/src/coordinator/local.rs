//! Handling the debug socket without the agent.
//!
//! The worker answers the handshake itself and serves monitor packets as
//! long as every packet it sees is one it can handle whole. Anything else
//! is left unread in the socket and the agent is attached to take over
//! from exactly that point.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

use nix::sys::socket::{MsgFlags, recv, send};
use tracing::{debug, error, info, warn};

use super::Worker;
use crate::agent::AgentArgs;
use crate::error::AdbConnError;
use crate::header::{HEADER_SIZE, HeaderBytes, PacketHeader};
use crate::packet::{Chunk, HANDSHAKE, MONITOR_COMMAND, MONITOR_COMMAND_SET, TypeName};
use crate::sync::retry_eintr;

nix::ioctl_read_bad!(fionread, libc::FIONREAD, libc::c_int);

/// What the next packet in the stream means for local handling.
enum Inbound {
    /// A whole monitor command was consumed from the socket.
    Monitor { id: u32, body: Vec<u8> },
    /// Left unread for the agent.
    Escalate(&'static str),
    /// The debugger closed the stream.
    Closed,
}

impl Worker {
    pub(super) fn handle_local_data(&mut self) {
        let Some(socket) = self.socket.clone() else {
            return;
        };
        if !self.phase.handshake_done() {
            self.perform_handshake(socket.as_fd());
            return;
        }

        match read_inbound(socket.as_fd()) {
            Ok(Inbound::Monitor { id, body }) => self.handle_monitor_packet(id, &body),
            Ok(Inbound::Escalate(reason)) => self.attach_agent(reason),
            Ok(Inbound::Closed) => {
                debug!("debugger closed the connection");
                self.close_connection();
            }
            Err(e) => {
                error!("failed to read from debugger, closing connection: {e}");
                self.close_connection();
            }
        }
    }

    fn perform_handshake(&mut self, socket: BorrowedFd<'_>) {
        match exchange_handshake(socket) {
            Ok(()) => {
                if let Err(e) = self.phase.handshake_completed() {
                    warn!("{e}");
                    return;
                }
                self.mirror_handshake();
                debug!("handshake complete");
            }
            Err(e) => {
                warn!("closing connection to broken client: {e}");
                self.close_connection();
            }
        }
    }

    fn handle_monitor_packet(&mut self, id: u32, body: &[u8]) {
        let Some(chunk) = Chunk::decode(body) else {
            debug!(id, len = body.len(), "dropping malformed monitor packet");
            return;
        };
        if !self.monitor_active {
            self.set_monitor_active(true);
        }

        let Some(reply) = self
            .collab
            .monitor
            .handle_chunk(chunk.chunk_type, &chunk.payload)
        else {
            return;
        };
        match self
            .shared
            .send_monitor(id, true, reply.chunk_type, &reply.payload)
        {
            Ok(true) => debug!(id, chunk = %TypeName(reply.chunk_type), "monitor reply sent"),
            Ok(false) => {}
            Err(e) => warn!(id, "failed to send monitor reply: {e}"),
        }
    }

    /// Hand the connection to the agent. If the agent cannot be loaded the
    /// connection is dropped, since nothing else can serve it.
    fn attach_agent(&mut self, reason: &'static str) {
        let args = AgentArgs::for_forwarding(
            &self.config.agent_name,
            &self.collab.runtime.agent_options(),
            self.monitor_active,
            self.channel.peer.as_raw_fd(),
            self.config.logfile_dir.as_deref(),
        );
        info!(reason, "loading agent");
        debug!(%args, "agent arguments");

        match self.collab.attacher.attach(&args) {
            Ok(()) => {
                if let Err(e) = self.phase.escalated() {
                    warn!("{e}");
                }
            }
            Err(e) => {
                error!(agent = %self.config.agent_name, "failed to load agent: {e}");
                self.close_connection();
            }
        }
    }
}

fn bytes_available(socket: BorrowedFd<'_>) -> Result<usize, AdbConnError> {
    let mut available: libc::c_int = 0;
    // SAFETY: FIONREAD writes a single int through the pointer.
    retry_eintr(|| unsafe { fionread(socket.as_raw_fd(), &mut available) })?;
    Ok(usize::try_from(available).unwrap_or(0))
}

fn exchange_handshake(socket: BorrowedFd<'_>) -> Result<(), AdbConnError> {
    let available = bytes_available(socket)?;
    if available < HANDSHAKE.len() {
        return Err(AdbConnError::PacketTooShort {
            expected: HANDSHAKE.len(),
            actual: available,
        });
    }

    let mut received = [0u8; HANDSHAKE.len()];
    let n = retry_eintr(|| recv(socket.as_raw_fd(), &mut received, MsgFlags::MSG_DONTWAIT))?;
    if n < HANDSHAKE.len() || &received != HANDSHAKE {
        return Err(AdbConnError::HandshakeMismatch);
    }

    let sent = retry_eintr(|| send(socket.as_raw_fd(), HANDSHAKE, MsgFlags::MSG_NOSIGNAL))?;
    if sent < HANDSHAKE.len() {
        return Err(AdbConnError::Other(format!(
            "short handshake reply: {sent} of {} bytes",
            HANDSHAKE.len()
        )));
    }
    Ok(())
}

/// Inspect the next packet without consuming anything unless it can be
/// handled here in full.
fn read_inbound(socket: BorrowedFd<'_>) -> Result<Inbound, AdbConnError> {
    let fd = socket.as_raw_fd();
    let mut peeked: HeaderBytes = [0; HEADER_SIZE];
    let n = retry_eintr(|| recv(fd, &mut peeked, MsgFlags::MSG_PEEK))?;
    if n == 0 {
        return Ok(Inbound::Closed);
    }
    if n < HEADER_SIZE {
        return Ok(Inbound::Escalate("partial packet header"));
    }

    let header = PacketHeader::from_bytes(&peeked);
    let body_len = match header.body_len() {
        Ok(body_len)
            if header.command_set == MONITOR_COMMAND_SET && header.command == MONITOR_COMMAND =>
        {
            body_len
        }
        _ => return Ok(Inbound::Escalate("packet not handled locally")),
    };
    let length = HEADER_SIZE + body_len;
    if bytes_available(socket)? < length {
        return Ok(Inbound::Escalate("incomplete monitor packet"));
    }

    let mut packet = vec![0u8; length];
    let n = retry_eintr(|| recv(fd, &mut packet, MsgFlags::empty()))?;
    if n < length {
        return Err(AdbConnError::PacketTooShort {
            expected: length,
            actual: n,
        });
    }
    Ok(Inbound::Monitor {
        id: header.id,
        body: packet.split_off(HEADER_SIZE),
    })
}
