//! State touched from more than one thread.
//!
//! Lock order is always the write guard token first, then the `link`
//! mutex. Neither is held while calling out to a collaborator.

use std::io::IoSlice;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use nix::sys::socket::{MsgFlags, UnixAddr, sendmsg};
use tracing::{debug, warn};

use crate::error::AdbConnError;
use crate::packet::{TypeName, encode_monitor_prefix};
use crate::sync::{WakeSignal, WriteGuard, retry_eintr};

/// High bit marking ids of packets this process originates.
pub(crate) const LOCAL_ID_FLAG: u32 = 0x8000_0000;

/// The debug socket as seen by publishers.
#[derive(Default)]
pub(crate) struct DebugLink {
    pub(crate) socket: Option<Arc<OwnedFd>>,
    pub(crate) handshake_done: bool,
}

pub(crate) struct Shared {
    pub(crate) shutting_down: AtomicBool,
    pub(crate) wake: WakeSignal,
    pub(crate) write_guard: WriteGuard,
    link: Mutex<DebugLink>,
    next_packet_id: AtomicU32,
}

impl Shared {
    pub(crate) fn new() -> Result<Self, AdbConnError> {
        Ok(Self {
            shutting_down: AtomicBool::new(false),
            wake: WakeSignal::new()?,
            write_guard: WriteGuard::new()?,
            link: Mutex::new(DebugLink::default()),
            next_packet_id: AtomicU32::new(1),
        })
    }

    pub(crate) fn link(&self) -> MutexGuard<'_, DebugLink> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Next id for a locally originated packet. Does not handle wraparound.
    pub(crate) fn next_packet_id(&self) -> u32 {
        self.next_packet_id.fetch_add(1, Ordering::Relaxed) | LOCAL_ID_FLAG
    }

    /// Write one monitor packet to the debug socket.
    ///
    /// Returns `Ok(false)` without writing when no debugger is connected
    /// or it has not completed the handshake.
    pub(crate) fn send_monitor(
        &self,
        id: u32,
        reply: bool,
        chunk_type: u32,
        payload: &[u8],
    ) -> Result<bool, AdbConnError> {
        let prefix = encode_monitor_prefix(id, reply, chunk_type, payload.len())?;

        let _token = self.write_guard.lock()?;
        let link = self.link();
        let socket = match &link.socket {
            Some(socket) if link.handshake_done => socket,
            _ => {
                debug!(chunk = %TypeName(chunk_type), "not sending monitor data: no connection");
                return Ok(false);
            }
        };

        let expected = prefix.len() + payload.len();
        let iov = [IoSlice::new(&prefix), IoSlice::new(payload)];
        let written = retry_eintr(|| {
            sendmsg::<UnixAddr>(socket.as_raw_fd(), &iov, &[], MsgFlags::MSG_NOSIGNAL, None)
        })?;
        if written != expected {
            warn!(written, expected, "short write of monitor packet");
            return Err(AdbConnError::Other(format!(
                "short monitor write: {written} of {expected} bytes"
            )));
        }
        Ok(true)
    }
}
