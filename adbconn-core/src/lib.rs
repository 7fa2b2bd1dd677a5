//! # adbconn-core
//!
//! Connection coordinator between a debuggable process, the external
//! debugging daemon, and an in-process debugging agent.
//!
//! This crate contains:
//! - **Wire format**: `PacketHeader`, `Packet`, `Chunk`, `PacketFlags`
//! - **Codec**: `PacketCodec` for framed stream I/O via `tokio_util`
//! - **Control protocol**: `ControlMessage` and `HandoffDirective` tokens
//!   exchanged with the agent
//! - **Transfer**: `DescriptorTransfer` for passing sockets to the agent
//! - **Session**: `DaemonClient` / `DaemonSession` and the Unix socket client
//! - **State**: `ConnectionPhase`, the connection state machine
//! - **Lifecycle**: `DebuggerController`, which owns the worker thread
//! - **Error**: `AdbConnError`, a typed `thiserror`-based error

pub mod agent;
pub mod codec;
pub mod config;
pub mod control;
mod coordinator;
pub mod error;
pub mod flags;
pub mod header;
pub mod lifecycle;
pub mod monitor;
pub mod packet;
pub mod session;
pub mod state;
pub mod sync;
pub mod transfer;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use agent::{AgentArgs, AgentAttacher, validate_options};
pub use codec::PacketCodec;
pub use config::CoordinatorConfig;
pub use control::{ControlMessage, HandoffDirective};
pub use error::AdbConnError;
pub use flags::PacketFlags;
pub use header::{HEADER_SIZE, PacketHeader};
pub use lifecycle::{Collaborators, DebuggerController, HostRuntime};
pub use monitor::{MonitorHandler, MonitorPublisher};
pub use packet::{Chunk, HANDSHAKE, MAX_PACKET_SIZE, Packet};
pub use session::{
    ClientInfo, DaemonAddress, DaemonClient, DaemonSession, UnixDaemonClient, UnixDaemonSession,
};
pub use state::{ConnectionPhase, Custody};
pub use transfer::{DescriptorTransfer, ScmRightsTransfer};
