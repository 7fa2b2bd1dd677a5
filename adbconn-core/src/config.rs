//! Coordinator tuning knobs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for one [`DebuggerController`](crate::lifecycle::DebuggerController).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Prefix of the agent argument string.
    pub agent_name: String,
    /// First reconnect delay after a failed rendezvous.
    pub backoff_initial_ms: u64,
    /// Upper bound for the reconnect delay.
    pub backoff_max_ms: u64,
    /// Name of the worker thread.
    pub thread_name: String,
    /// Base directory for a relative agent `logfile=` option.
    pub logfile_dir: Option<PathBuf>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            agent_name: "libjdwp.so".into(),
            backoff_initial_ms: 500,
            backoff_max_ms: 2000,
            thread_name: "ADB-JDWP Connection Control Thread".into(),
            logfile_dir: None,
        }
    }
}

/// Longest single backoff sleep the wake channel can wait for.
pub const MAX_BACKOFF_MS: u64 = u16::MAX as u64;

impl CoordinatorConfig {
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms.clamp(1, MAX_BACKOFF_MS))
    }

    /// At least the initial delay, at most [`MAX_BACKOFF_MS`].
    pub fn backoff_max(&self) -> Duration {
        let max_ms = self
            .backoff_max_ms
            .max(self.backoff_initial_ms)
            .clamp(1, MAX_BACKOFF_MS);
        if max_ms < self.backoff_max_ms {
            tracing::warn!(
                configured = self.backoff_max_ms,
                used = max_ms,
                "backoff_max_ms above the supported limit"
            );
        }
        Duration::from_millis(max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.backoff_initial(), Duration::from_millis(500));
        assert_eq!(cfg.backoff_max(), Duration::from_secs(2));
        assert_eq!(cfg.agent_name, "libjdwp.so");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: CoordinatorConfig = serde_json::from_str(r#"{"backoff_max_ms": 100}"#).unwrap();
        assert_eq!(cfg.backoff_initial_ms, 500);
        // A max below the initial delay is raised to it.
        assert_eq!(cfg.backoff_max(), Duration::from_millis(500));
    }

    #[test]
    fn backoff_is_clamped_to_wait_limit() {
        let cfg = CoordinatorConfig {
            backoff_initial_ms: 100_000,
            backoff_max_ms: 3_600_000,
            ..Default::default()
        };
        assert_eq!(cfg.backoff_initial(), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(cfg.backoff_max(), Duration::from_millis(MAX_BACKOFF_MS));
    }
}
