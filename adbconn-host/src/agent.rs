//! Launching the full agent as a child process.
//!
//! The agent's end of the control channel is inherited by the child; the
//! debug socket arrives over it later. The argument string is passed as
//! the last command-line argument.

use std::os::fd::RawFd;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};
use std::sync::Mutex;

use tracing::{info, warn};

use adbconn_core::{AdbConnError, AgentArgs, AgentAttacher};

pub struct CommandAgentAttacher {
    command: Vec<String>,
    children: Mutex<Vec<Child>>,
}

impl CommandAgentAttacher {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            children: Mutex::new(Vec::new()),
        }
    }

    /// The control descriptor named by `address=` in `<agent>=<params>`.
    fn control_fd(args: &str) -> Result<RawFd, AdbConnError> {
        let params = args.split_once('=').map_or("", |(_, params)| params);
        AgentArgs::parse(params)
            .get("address")
            .and_then(|addr| addr.parse().ok())
            .ok_or_else(|| AdbConnError::AgentAttach(format!("no control address in {args:?}")))
    }
}

impl AgentAttacher for CommandAgentAttacher {
    fn attach(&self, args: &str) -> Result<(), AdbConnError> {
        let Some((program, leading)) = self.command.split_first() else {
            return Err(AdbConnError::AgentAttach("no agent command configured".into()));
        };
        let fd = Self::control_fd(args)?;

        let mut command = Command::new(program);
        command.args(leading).arg(args);
        // SAFETY: only fcntl runs between fork and exec.
        unsafe {
            command.pre_exec(move || {
                if libc::fcntl(fd, libc::F_SETFD, 0) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = command
            .spawn()
            .map_err(|e| AdbConnError::AgentAttach(format!("{program}: {e}")))?;
        info!(pid = child.id(), %program, "agent process started");
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(child);
        Ok(())
    }
}

impl Drop for CommandAgentAttacher {
    fn drop(&mut self) {
        let children = self.children.get_mut().unwrap_or_else(|e| e.into_inner());
        for child in children.iter_mut() {
            if let Err(e) = child.kill() {
                warn!(pid = child.id(), "failed to stop agent process: {e}");
            }
            child.wait().ok();
        }
    }
}
