//! Domain-specific error types for the debugger connection coordinator.
//!
//! All fallible operations return `Result<T, AdbConnError>`.
//! The worker thread never panics on peer input; every error is typed and
//! either logged or turned into a state transition.

use thiserror::Error;

/// The canonical error type for the coordinator.
#[derive(Debug, Error)]
pub enum AdbConnError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A field in the packet header could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// Fewer bytes were available than the framing requires.
    #[error("packet too short: need {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    /// A declared packet length exceeded the codec limit.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// The agent sent a control token this side does not understand.
    #[error("unknown control message: {0:?}")]
    UnknownControlMessage(String),

    /// A phase transition was requested from a phase that does not allow it.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    /// The debugger did not send the expected handshake bytes.
    #[error("handshake mismatch")]
    HandshakeMismatch,

    // ── System Errors ────────────────────────────────────────────
    /// The std I/O layer reported an error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A raw syscall failed.
    #[error("syscall failed: {0}")]
    Sys(#[from] nix::errno::Errno),

    // ── Daemon Errors ────────────────────────────────────────────
    /// The rendezvous with the daemon could not be established.
    #[error("daemon unavailable: {0}")]
    DaemonUnavailable(String),

    /// The daemon session closed or sent something that is not a connection.
    #[error("daemon session lost")]
    SessionLost,

    // ── Lifecycle Errors ─────────────────────────────────────────
    /// `start` was called while the worker is already running.
    #[error("coordinator already started")]
    AlreadyStarted,

    /// The process is neither debuggable nor profileable.
    #[error("debugging is not possible for this process")]
    DebuggingUnavailable,

    /// The host runtime refused to create a new thread.
    #[error("host runtime is shutting down")]
    RuntimeShuttingDown,

    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(std::io::Error),

    // ── Agent Errors ─────────────────────────────────────────────
    /// The agent attach collaborator reported a failure.
    #[error("agent attach failed: {0}")]
    AgentAttach(String),

    /// The configured agent options are incompatible with fd forwarding.
    #[error("invalid agent options: {0}")]
    InvalidAgentOptions(String),

    // ── Serialization Errors ─────────────────────────────────────
    /// Client metadata could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for AdbConnError {
    fn from(s: String) -> Self {
        AdbConnError::Other(s)
    }
}

impl From<&str> for AdbConnError {
    fn from(s: &str) -> Self {
        AdbConnError::Other(s.to_string())
    }
}

impl From<AdbConnError> for std::io::Error {
    fn from(e: AdbConnError) -> Self {
        match e {
            AdbConnError::Io(io) => io,
            AdbConnError::Sys(errno) => std::io::Error::from(errno),
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
