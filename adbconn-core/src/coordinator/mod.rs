//! The connection control worker.
//!
//! One thread owns the daemon session, the debug socket and the
//! [`ConnectionPhase`]. Each iteration it polls up to four sources and
//! reacts to exactly one of them, in priority order:
//!
//! 1. agent control socket readable
//! 2. daemon session readable
//! 3. daemon session hung up
//! 4. debug socket readable
//! 5. debug socket hung up
//!
//! The wake channel is always polled so `stop` can interrupt the wait.

mod local;
pub(crate) mod shared;

use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::socket::{MsgFlags, recv};
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::control::{ControlMessage, HandoffDirective, MAX_CONTROL_MESSAGE};
use crate::error::AdbConnError;
use crate::lifecycle::Collaborators;
use crate::session::{ClientInfo, DaemonSession};
use crate::state::ConnectionPhase;
use crate::sync::{WriteGuardLock, retry_eintr};

use self::shared::Shared;

/// Reported whether requested or not. A peer that closes its end shows
/// up as `POLLIN` with a zero-length read before `POLLHUP` is raised.
const HANGUP: PollFlags = PollFlags::POLLHUP.union(PollFlags::POLLERR);

/// Both ends of the agent control channel. The peer end's number is
/// passed to the agent in its arguments.
pub(crate) struct AgentChannel {
    pub(crate) local: OwnedFd,
    pub(crate) peer: OwnedFd,
}

/// Revents per source; empty for sources not polled this round.
#[derive(Debug)]
struct Readiness {
    wake: PollFlags,
    control: PollFlags,
    session: PollFlags,
    socket: PollFlags,
}

pub(crate) struct Worker {
    config: CoordinatorConfig,
    shared: Arc<Shared>,
    collab: Collaborators,
    channel: AgentChannel,
    session: Option<Box<dyn DaemonSession>>,
    socket: Option<Arc<OwnedFd>>,
    phase: ConnectionPhase,
    monitor_active: bool,
}

impl Worker {
    pub(crate) fn new(
        config: CoordinatorConfig,
        shared: Arc<Shared>,
        collab: Collaborators,
        channel: AgentChannel,
    ) -> Self {
        Self {
            config,
            shared,
            collab,
            channel,
            session: None,
            socket: None,
            phase: ConnectionPhase::default(),
            monitor_active: false,
        }
    }

    pub(crate) fn run(mut self) {
        info!("connection control thread running");
        while !self.shared.is_shutting_down() {
            if self.session.is_none() && !self.connect_daemon() {
                break;
            }
            if let Err(e) = self.serve_session() {
                error!("poll failed, debugging unavailable for this process: {e}");
                break;
            }
        }
        info!(phase = %self.phase, "connection control thread exiting");
    }

    // ── Daemon rendezvous ────────────────────────────────────────

    /// Retry the rendezvous with capped exponential backoff. Returns
    /// `false` only when shutting down.
    fn connect_daemon(&mut self) -> bool {
        let info = ClientInfo::current(
            self.collab.runtime.debugging_allowed(),
            self.collab.runtime.profileable_from_shell(),
        );
        let max = self.config.backoff_max();
        let mut delay = self.config.backoff_initial();

        while !self.shared.is_shutting_down() {
            match self.collab.daemon.connect(&info) {
                Ok(session) => {
                    info!("daemon session established");
                    self.session = Some(session);
                    return true;
                }
                Err(e) => debug!(retry_ms = delay.as_millis() as u64, "daemon not reachable: {e}"),
            }
            self.backoff(delay);
            delay = delay.saturating_mul(2).min(max);
        }
        false
    }

    fn backoff(&self, delay: Duration) {
        match self.shared.wake.wait(delay) {
            Ok(true) => self.shared.wake.drain(),
            Ok(false) => {}
            Err(e) => {
                error!("backoff wait failed: {e}");
                std::thread::sleep(delay);
            }
        }
    }

    // ── Poll loop ────────────────────────────────────────────────

    fn serve_session(&mut self) -> Result<(), AdbConnError> {
        while !self.shared.is_shutting_down() && self.session.is_some() {
            let ready = self.wait_ready()?;

            if ready.wake.contains(PollFlags::POLLIN) {
                self.shared.wake.drain();
            }

            if ready.control.contains(PollFlags::POLLIN) {
                self.on_agent_control();
            } else if ready.session.contains(PollFlags::POLLIN) {
                self.on_session_readable();
            } else if ready.session.intersects(HANGUP) {
                info!("daemon session hung up, reconnecting");
                self.session = None;
            } else if ready.socket.contains(PollFlags::POLLIN) {
                self.on_debug_data();
            } else if ready.socket.intersects(HANGUP) {
                debug!("debugger hung up");
                self.close_connection();
            }
        }
        Ok(())
    }

    fn wait_ready(&self) -> Result<Readiness, AdbConnError> {
        let mut fds = Vec::with_capacity(4);
        let mut slots: [Option<usize>; 4] = [None; 4];

        slots[0] = Some(fds.len());
        fds.push(PollFd::new(self.shared.wake.as_fd(), PollFlags::POLLIN));

        if self.phase.agent_loaded() {
            slots[1] = Some(fds.len());
            fds.push(PollFd::new(self.channel.local.as_fd(), PollFlags::POLLIN));
        }
        if let Some(session) = self.session.as_ref().filter(|_| !self.phase.has_client()) {
            slots[2] = Some(fds.len());
            fds.push(PollFd::new(session.pollable_fd(), PollFlags::POLLIN));
        }
        if let Some(socket) = self.socket.as_ref().filter(|_| self.phase.owns_stream()) {
            slots[3] = Some(fds.len());
            fds.push(PollFd::new(socket.as_fd(), PollFlags::POLLIN));
        }

        retry_eintr(|| poll(&mut fds, PollTimeout::NONE))?;

        let revents = |slot: Option<usize>| {
            slot.and_then(|i| fds[i].revents())
                .unwrap_or(PollFlags::empty())
        };
        Ok(Readiness {
            wake: revents(slots[0]),
            control: revents(slots[1]),
            session: revents(slots[2]),
            socket: revents(slots[3]),
        })
    }

    // ── Agent control ────────────────────────────────────────────

    fn on_agent_control(&mut self) {
        let mut buf = [0u8; MAX_CONTROL_MESSAGE];
        let fd = self.channel.local.as_raw_fd();
        let n = match retry_eintr(|| recv(fd, &mut buf, MsgFlags::empty())) {
            Ok(n) => n,
            Err(e) => {
                error!("failed to read agent control message: {e}");
                return;
            }
        };
        let msg = match ControlMessage::try_from(&buf[..n]) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("{e}");
                return;
            }
        };
        debug!(%msg, phase = %self.phase, "agent control message");
        if let Err(e) = self.apply_control(msg) {
            warn!(%msg, "ignored agent control message: {e}");
        }
    }

    fn apply_control(&mut self, msg: ControlMessage) -> Result<(), AdbConnError> {
        match msg {
            ControlMessage::ListenStart => {
                self.phase.set_listening(true)?;
                self.try_handoff();
            }
            ControlMessage::ListenEnd => self.phase.set_listening(false)?,
            ControlMessage::HandshakeComplete => {
                if self.phase.agent_handshake_completed()? {
                    self.mirror_handshake();
                }
            }
            ControlMessage::Close => self.close_connection(),
            ControlMessage::Accept => {
                self.phase.agent_accepted()?;
                self.mirror_handshake();
            }
        }
        Ok(())
    }

    // ── Daemon session ───────────────────────────────────────────

    fn on_session_readable(&mut self) {
        if !self.collab.runtime.debugging_allowed() {
            debug!("profileable-only process: resetting daemon session");
            self.session = None;
            return;
        }

        let shared = Arc::clone(&self.shared);
        let token = lock_writes(&shared);
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let fd = match session.accept_connection() {
            Ok(fd) => fd,
            Err(e) => {
                warn!("daemon session failed, reconnecting: {e}");
                self.session = None;
                return;
            }
        };
        if self.phase.has_client() {
            debug!("ignoring second debugger: accept then drop");
            return;
        }
        if let Err(e) = self.phase.client_connected() {
            warn!("{e}");
            return;
        }
        let socket = Arc::new(fd);
        {
            let mut link = shared.link();
            link.socket = Some(Arc::clone(&socket));
            link.handshake_done = false;
        }
        self.socket = Some(socket);
        drop(token);

        info!("debugger connected");
        if self.phase.agent_listening() {
            debug!("agent already listening, handing off new connection");
            self.try_handoff();
        }
    }

    // ── Debug socket ─────────────────────────────────────────────

    fn on_debug_data(&mut self) {
        if self.phase.agent_loaded() {
            self.try_handoff();
        } else {
            self.handle_local_data();
        }
    }

    /// Send the debug socket to the agent if the phase calls for it.
    /// A failed send is logged and retried on the next trigger.
    fn try_handoff(&mut self) {
        let Some(directive) = self.phase.pending_handoff() else {
            return;
        };
        match self.send_fds(directive) {
            Ok(()) => {
                if let Err(e) = self.phase.fds_transferred() {
                    warn!("{e}");
                }
                info!(%directive, "debug socket sent to agent");
            }
            Err(e) => error!("failed to send debug socket to agent: {e}"),
        }
    }

    fn send_fds(&self, directive: HandoffDirective) -> Result<(), AdbConnError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or(AdbConnError::InvalidTransition("no debug socket to send"))?;
        let read_fd = socket.try_clone()?;
        let write_fd = socket.try_clone()?;
        let lock_fd = self.shared.write_guard.duplicate()?;
        self.collab.transfer.transfer(
            self.channel.local.as_fd(),
            directive,
            &[read_fd.as_fd(), write_fd.as_fd(), lock_fd.as_fd()],
        )
    }

    /// Drop the debug socket and forget its handshake.
    fn close_connection(&mut self) {
        {
            let _token = lock_writes(&self.shared);
            let mut link = self.shared.link();
            link.socket = None;
            link.handshake_done = false;
            self.socket = None;
        }
        self.phase.connection_closed();
        if !self.phase.agent_loaded() && self.monitor_active {
            self.set_monitor_active(false);
        }
    }

    fn mirror_handshake(&self) {
        self.shared.link().handshake_done = self.phase.handshake_done();
    }

    fn set_monitor_active(&mut self, active: bool) {
        self.monitor_active = active;
        self.collab.monitor.on_activated(active);
    }
}

/// Take the write token, logging rather than failing if it cannot be read.
fn lock_writes(shared: &Shared) -> Option<WriteGuardLock<'_>> {
    match shared.write_guard.lock() {
        Ok(lock) => Some(lock),
        Err(e) => {
            error!("failed to take write guard: {e}");
            None
        }
    }
}

/// Clears the link without taking the write token, which an agent that
/// died may still hold. Publishers write under the link mutex.
impl Drop for Worker {
    fn drop(&mut self) {
        *self.shared.link() = Default::default();
    }
}
