//! Starting and stopping the connection control worker.
//!
//! The host constructs one [`DebuggerController`] per process, hands it
//! its collaborators, and calls [`start`](DebuggerController::start) /
//! [`stop`](DebuggerController::stop) from its own startup and shutdown
//! paths.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
use tracing::{error, info, warn};

use crate::agent::{AgentAttacher, validate_options};
use crate::config::CoordinatorConfig;
use crate::coordinator::shared::Shared;
use crate::coordinator::{AgentChannel, Worker};
use crate::error::AdbConnError;
use crate::monitor::{MonitorHandler, MonitorPublisher};
use crate::session::DaemonClient;
use crate::transfer::{DescriptorTransfer, ScmRightsTransfer};

// ── HostRuntime ──────────────────────────────────────────────────

/// What the coordinator needs from the process hosting it.
pub trait HostRuntime: Send + Sync {
    /// Whether a debugger may attach to this process.
    fn debugging_allowed(&self) -> bool;

    /// Whether this process may be profiled from the shell.
    fn profileable_from_shell(&self) -> bool;

    /// Reserve a thread slot. Returns `false` if the runtime is shutting
    /// down and no new thread may start.
    fn begin_thread_birth(&self) -> bool;

    /// Release the slot taken by `begin_thread_birth`. Called exactly once
    /// per successful `begin_thread_birth`, from the new thread or from
    /// `start` if the spawn failed.
    fn end_thread_birth(&self);

    /// Raw agent options, `,` or `;` separated.
    fn agent_options(&self) -> String;

    /// Receives the publisher for unsolicited monitor chunks.
    fn register_monitor_publisher(&self, _publisher: MonitorPublisher) {}
}

// ── Collaborators ────────────────────────────────────────────────

/// Everything the worker calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub runtime: Arc<dyn HostRuntime>,
    pub daemon: Arc<dyn DaemonClient>,
    pub monitor: Arc<dyn MonitorHandler>,
    pub attacher: Arc<dyn AgentAttacher>,
    pub transfer: Arc<dyn DescriptorTransfer>,
}

impl Collaborators {
    /// Collaborators using `SCM_RIGHTS` for the descriptor handoff.
    pub fn new(
        runtime: Arc<dyn HostRuntime>,
        daemon: Arc<dyn DaemonClient>,
        monitor: Arc<dyn MonitorHandler>,
        attacher: Arc<dyn AgentAttacher>,
    ) -> Self {
        Self {
            runtime,
            daemon,
            monitor,
            attacher,
            transfer: Arc::new(ScmRightsTransfer),
        }
    }

    pub fn with_transfer(mut self, transfer: Arc<dyn DescriptorTransfer>) -> Self {
        self.transfer = transfer;
        self
    }
}

// ── DebuggerController ───────────────────────────────────────────

struct Running {
    shared: Arc<Shared>,
    handle: JoinHandle<()>,
}

pub struct DebuggerController {
    config: CoordinatorConfig,
    collab: Collaborators,
    running: Option<Running>,
}

impl DebuggerController {
    /// Fails if the host's agent options cannot work with fd forwarding.
    pub fn new(config: CoordinatorConfig, collab: Collaborators) -> Result<Self, AdbConnError> {
        validate_options(&collab.runtime.agent_options())?;
        Ok(Self {
            config,
            collab,
            running: None,
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// A debugger can attach and the host supplied agent options.
    pub fn is_debugger_configured(&self) -> bool {
        self.collab.runtime.debugging_allowed() && !self.collab.runtime.agent_options().is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Set up the channels and spawn the worker.
    ///
    /// On error nothing is left behind: every descriptor created here is
    /// closed and a reserved thread slot is released.
    pub fn start(&mut self) -> Result<(), AdbConnError> {
        if self.running.is_some() {
            return Err(AdbConnError::AlreadyStarted);
        }
        let runtime = &self.collab.runtime;
        if !runtime.debugging_allowed() && !runtime.profileable_from_shell() {
            error!("not starting debugger: process is neither debuggable nor profileable");
            return Err(AdbConnError::DebuggingUnavailable);
        }

        let shared = Arc::new(Shared::new()?);
        let (local, peer) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_CLOEXEC,
        )?;
        runtime.register_monitor_publisher(MonitorPublisher::new(Arc::clone(&shared)));

        if !runtime.begin_thread_birth() {
            error!("host runtime is shutting down, not starting debugger");
            return Err(AdbConnError::RuntimeShuttingDown);
        }

        let worker = Worker::new(
            self.config.clone(),
            Arc::clone(&shared),
            self.collab.clone(),
            AgentChannel { local, peer },
        );
        let thread_runtime = Arc::clone(runtime);
        let spawned = std::thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || {
                thread_runtime.end_thread_birth();
                worker.run();
            });

        match spawned {
            Ok(handle) => {
                info!(thread = %self.config.thread_name, "debugger started");
                self.running = Some(Running { shared, handle });
                Ok(())
            }
            Err(e) => {
                runtime.end_thread_birth();
                error!("failed to create connection control thread: {e}");
                Err(AdbConnError::ThreadSpawn(e))
            }
        }
    }

    /// Signal the worker to exit and wait for it. No-op if not running.
    pub fn stop(&mut self) {
        let Some(Running { shared, handle }) = self.running.take() else {
            return;
        };
        shared.shutting_down.store(true, Ordering::Release);
        if let Err(e) = shared.wake.notify() {
            error!("failed to wake connection control thread: {e}");
        }
        if handle.join().is_err() {
            warn!("connection control thread panicked");
        }
        info!("debugger stopped");
    }

    /// A publisher for the running worker, if any.
    pub fn publisher(&self) -> Option<MonitorPublisher> {
        self.running
            .as_ref()
            .map(|r| MonitorPublisher::new(Arc::clone(&r.shared)))
    }
}

impl Drop for DebuggerController {
    fn drop(&mut self) {
        self.stop();
    }
}
