//! # adbconn-host - standalone coordinator host
//!
//! Runs a `DebuggerController` in a plain process: the process identity
//! and agent options come from a TOML file, the full agent is launched as
//! a child process, and monitor chunks are answered by a logging handler.
//!
//! Also ships a debugger-side probe for checking a forwarded connection
//! end to end.

pub mod agent;
pub mod config;
pub mod probe;
pub mod runtime;
