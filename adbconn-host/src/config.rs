//! Configuration for the standalone host.

use std::path::Path;

use serde::{Deserialize, Serialize};

use adbconn_core::{CoordinatorConfig, DaemonAddress};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Worker tuning.
    pub coordinator: CoordinatorConfig,
    /// Where to find the debugging daemon.
    pub daemon: DaemonConfig,
    /// What this process reports about itself.
    pub process: ProcessConfig,
    /// How to launch the full agent.
    pub agent: AgentConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Daemon rendezvous settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Socket path, or `@name` for the abstract namespace.
    pub socket: String,
}

/// Process properties reported to the daemon and the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// A debugger may attach.
    pub debuggable: bool,
    /// The process may be profiled from the shell.
    pub profileable: bool,
    /// Raw agent options, `,` or `;` separated.
    pub agent_options: String,
}

/// Agent launch settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Program and leading arguments. The agent argument string is
    /// appended as the final argument.
    pub command: Vec<String>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket: "@jdwp-control".into(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            debuggable: true,
            profileable: false,
            agent_options: "transport=dt_fd_forward".into(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn daemon_address(&self) -> DaemonAddress {
        DaemonAddress::parse(&self.daemon.socket)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&HostConfig::default()).unwrap();
        assert!(text.contains("[coordinator]"));
        assert!(text.contains("jdwp-control"));
        assert!(text.contains("agent_options"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: HostConfig = toml::from_str(
            r#"
            [process]
            profileable = true

            [coordinator]
            backoff_max_ms = 8000
            "#,
        )
        .unwrap();
        assert!(cfg.process.debuggable);
        assert!(cfg.process.profileable);
        assert_eq!(cfg.coordinator.backoff_max_ms, 8000);
        assert_eq!(cfg.coordinator.backoff_initial_ms, 500);
        assert_eq!(cfg.daemon.socket, "@jdwp-control");
        assert!(cfg.agent.command.is_empty());
    }

    #[test]
    fn abstract_daemon_address() {
        let cfg = HostConfig::default();
        assert_eq!(
            cfg.daemon_address(),
            DaemonAddress::Abstract("jdwp-control".into())
        );
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let cfg = HostConfig::load(Path::new("/nonexistent/adbconn-host.toml"));
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn write_then_load() {
        let path = std::env::temp_dir().join(format!("adbconn-host-{}.toml", std::process::id()));
        HostConfig::write_default(&path).unwrap();
        let cfg = HostConfig::load(&path);
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.coordinator, CoordinatorConfig::default());
    }
}
