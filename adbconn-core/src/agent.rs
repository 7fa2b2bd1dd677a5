//! Agent attach contract and the argument string handed to it.
//!
//! Raw options come from the host as `key=value` pairs separated by `,`
//! or `;`. The coordinator overrides the keys it depends on and joins the
//! result with `;` behind the agent name:
//!
//! ```text
//! libjdwp.so=transport=dt_fd_forward;server=y;suspend=n;ddm_already_active=n;address=7
//! ```

use std::fmt;
use std::os::fd::RawFd;
use std::path::Path;

use tracing::debug;

use crate::error::AdbConnError;

/// Loads the full debugging agent into the process.
pub trait AgentAttacher: Send + Sync {
    /// Attach the agent with `args` (`<agent-name>=<params>`).
    ///
    /// Called on the worker thread with no lock held.
    fn attach(&self, args: &str) -> Result<(), AdbConnError>;
}

/// Reject options the fd-forwarding transport cannot honour.
///
/// The agent must act as a server, since the daemon is the one that
/// connects. It is loaded long after startup, so it cannot suspend.
pub fn validate_options(opts: &str) -> Result<(), AdbConnError> {
    if opts.contains("server=n") {
        return Err(AdbConnError::InvalidAgentOptions(
            "server=n cannot be used with fd forwarding".into(),
        ));
    }
    if opts.contains("suspend=y") {
        return Err(AdbConnError::InvalidAgentOptions(
            "suspend=y cannot be used with a late-attached agent".into(),
        ));
    }
    Ok(())
}

// ── AgentArgs ────────────────────────────────────────────────────

/// Ordered `key=value` parameters. Keys keep their first position when
/// overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentArgs {
    entries: Vec<(String, Option<String>)>,
}

impl AgentArgs {
    pub fn parse(opts: &str) -> Self {
        let mut args = Self::default();
        for item in opts.split([',', ';']).map(str::trim).filter(|s| !s.is_empty()) {
            match item.split_once('=') {
                Some((key, value)) => args.put(key, value),
                None => args.entries.push((item.to_string(), None)),
            }
        }
        args
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn put(&mut self, key: &str, value: impl Into<String>) {
        let value = Some(value.into());
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    /// Anchor a relative `logfile` under `dir`. Absolute paths are kept.
    pub fn fix_logfile(&mut self, dir: Option<&Path>) {
        let Some(logfile) = self.get("logfile") else {
            return;
        };
        if logfile.starts_with('/') {
            return;
        }
        let Some(dir) = dir else {
            debug!(logfile, "relative agent logfile left as is: no data directory");
            return;
        };
        let fixed = dir.join(logfile).to_string_lossy().into_owned();
        self.put("logfile", fixed);
    }

    /// The full argument string for an agent attached to `peer_fd`.
    pub fn for_forwarding(
        agent_name: &str,
        raw_opts: &str,
        monitor_already_active: bool,
        peer_fd: RawFd,
        logfile_dir: Option<&Path>,
    ) -> String {
        let mut args = Self::parse(raw_opts);
        args.put("server", "y");
        args.put("suspend", "n");
        args.put(
            "ddm_already_active",
            if monitor_already_active { "y" } else { "n" },
        );
        args.put("transport", "dt_fd_forward");
        args.put("address", peer_fd.to_string());
        args.fix_logfile(logfile_dir);
        format!("{agent_name}={args}")
    }
}

impl fmt::Display for AgentArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            match value {
                Some(value) => write!(f, "{key}={value}")?,
                None => f.write_str(key)?,
            }
        }
        Ok(())
    }
}
