//! Monitor (diagnostic chunk) traffic between the host and the debugger.
//!
//! Inbound chunks reach the host through [`MonitorHandler`]. Outbound
//! chunks go through a [`MonitorPublisher`], which any thread may hold.

use std::sync::Arc;

use crate::coordinator::shared::Shared;
use crate::error::AdbConnError;
use crate::packet::Chunk;

/// Host-side handler for monitor chunks.
///
/// Both methods run on the worker thread with no lock held, so they may
/// call [`MonitorPublisher::publish`].
pub trait MonitorHandler: Send + Sync {
    /// A debugger started (`true`) or stopped (`false`) exchanging monitor
    /// packets with this process.
    fn on_activated(&self, active: bool);

    /// Handle one chunk. A returned chunk is sent back as the reply; `None`
    /// sends nothing.
    fn handle_chunk(&self, chunk_type: u32, payload: &[u8]) -> Option<Chunk>;
}

/// Sends unsolicited monitor chunks to the connected debugger.
#[derive(Clone)]
pub struct MonitorPublisher {
    shared: Arc<Shared>,
}

impl MonitorPublisher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Publish one chunk as a command packet with a fresh local id.
    ///
    /// Returns `Ok(false)` when nothing was sent because no debugger is
    /// connected or its handshake is not finished.
    pub fn publish(&self, chunk_type: u32, payload: &[u8]) -> Result<bool, AdbConnError> {
        let id = self.shared.next_packet_id();
        self.shared.send_monitor(id, false, chunk_type, payload)
    }

    pub fn publish_chunk(&self, chunk: &Chunk) -> Result<bool, AdbConnError> {
        self.publish(chunk.chunk_type, &chunk.payload)
    }
}

impl std::fmt::Debug for MonitorPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorPublisher").finish_non_exhaustive()
    }
}
