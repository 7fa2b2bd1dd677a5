//! The host process as seen by the coordinator.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::{BufMut, BytesMut};
use tracing::{debug, info};

use adbconn_core::packet::TypeName;
use adbconn_core::{Chunk, HostRuntime, MonitorHandler, MonitorPublisher};

use crate::config::ProcessConfig;

/// Greeting chunk exchanged when a monitor session opens.
pub const HELO: u32 = Chunk::fourcc(b"HELO");

/// Protocol version reported in the `HELO` reply.
const MONITOR_VERSION: u32 = 1;

// ── ProcessRuntime ───────────────────────────────────────────────

/// Runtime properties backed by the host config.
pub struct ProcessRuntime {
    process: ProcessConfig,
    shutting_down: AtomicBool,
    births: AtomicUsize,
    publisher: Mutex<Option<MonitorPublisher>>,
}

impl ProcessRuntime {
    pub fn new(process: ProcessConfig) -> Self {
        Self {
            process,
            shutting_down: AtomicBool::new(false),
            births: AtomicUsize::new(0),
            publisher: Mutex::new(None),
        }
    }

    /// Refuse new threads from now on.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Threads reserved but not yet running.
    pub fn pending_births(&self) -> usize {
        self.births.load(Ordering::SeqCst)
    }

    /// The publisher registered by the most recent `start`.
    pub fn publisher(&self) -> Option<MonitorPublisher> {
        self.publisher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl HostRuntime for ProcessRuntime {
    fn debugging_allowed(&self) -> bool {
        self.process.debuggable
    }

    fn profileable_from_shell(&self) -> bool {
        self.process.profileable
    }

    fn begin_thread_birth(&self) -> bool {
        if self.shutting_down.load(Ordering::SeqCst) {
            return false;
        }
        self.births.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn end_thread_birth(&self) {
        self.births.fetch_sub(1, Ordering::SeqCst);
    }

    fn agent_options(&self) -> String {
        self.process.agent_options.clone()
    }

    fn register_monitor_publisher(&self, publisher: MonitorPublisher) {
        *self.publisher.lock().unwrap_or_else(|e| e.into_inner()) = Some(publisher);
    }
}

// ── LoggingMonitor ───────────────────────────────────────────────

/// Answers `HELO` with the process identity and logs everything else.
#[derive(Debug, Default)]
pub struct LoggingMonitor;

impl LoggingMonitor {
    /// `HELO` reply payload: version, pid, then the process name in UTF-8.
    fn hello_payload() -> BytesMut {
        let name = std::env::args().next().unwrap_or_default();
        let mut buf = BytesMut::with_capacity(8 + name.len());
        buf.put_u32(MONITOR_VERSION);
        buf.put_u32(std::process::id());
        buf.put_slice(name.as_bytes());
        buf
    }
}

impl MonitorHandler for LoggingMonitor {
    fn on_activated(&self, active: bool) {
        info!(active, "monitor session state changed");
    }

    fn handle_chunk(&self, chunk_type: u32, payload: &[u8]) -> Option<Chunk> {
        debug!(chunk = %TypeName(chunk_type), len = payload.len(), "monitor chunk");
        (chunk_type == HELO).then(|| Chunk::new(HELO, Self::hello_payload().freeze()))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_births_are_counted() {
        let runtime = ProcessRuntime::new(ProcessConfig::default());
        assert!(runtime.begin_thread_birth());
        assert_eq!(runtime.pending_births(), 1);
        runtime.end_thread_birth();
        assert_eq!(runtime.pending_births(), 0);
    }

    #[test]
    fn shutdown_refuses_births() {
        let runtime = ProcessRuntime::new(ProcessConfig::default());
        runtime.begin_shutdown();
        assert!(!runtime.begin_thread_birth());
        assert_eq!(runtime.pending_births(), 0);
    }

    #[test]
    fn properties_come_from_config() {
        let runtime = ProcessRuntime::new(ProcessConfig {
            debuggable: false,
            profileable: true,
            agent_options: "logfile=jdwp.log".into(),
        });
        assert!(!runtime.debugging_allowed());
        assert!(runtime.profileable_from_shell());
        assert_eq!(runtime.agent_options(), "logfile=jdwp.log");
        assert!(runtime.publisher().is_none());
    }

    #[test]
    fn hello_reply_carries_pid() {
        let reply = LoggingMonitor.handle_chunk(HELO, b"").unwrap();
        assert_eq!(reply.chunk_type, HELO);
        assert_eq!(&reply.payload[..4], &MONITOR_VERSION.to_be_bytes());
        assert_eq!(&reply.payload[4..8], &std::process::id().to_be_bytes());
    }

    #[test]
    fn other_chunks_get_no_reply() {
        assert!(
            LoggingMonitor
                .handle_chunk(Chunk::fourcc(b"WAIT"), b"\x00")
                .is_none()
        );
    }
}
