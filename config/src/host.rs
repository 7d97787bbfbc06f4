//! Host-side settings (`capstan.toml`).
//!
//! Everything the binary needs that is not per-profile: how to reach the
//! service (spawned child vs. the loopback TCP port a debugger-launched
//! service listens on), timeouts, the crash report endpoint. Absent file or
//! absent keys mean defaults; a malformed file warns and falls back rather
//! than blocking startup.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Loopback port a development-mode service listens on.
pub const DEFAULT_TCP_PORT: u16 = 2087;
/// How long a stop may take before the handle is force-released.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 2_000;
/// How long an interpreter probe may run before it counts as hung.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;
/// Python module launched with `-m` in stdio mode.
pub const DEFAULT_SERVICE_MODULE: &str = "capstan_server";

/// How the host reaches the service process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Spawn the service as a child and talk over stdio pipes.
    #[default]
    Stdio,
    /// Connect to an already-running service on the loopback TCP port.
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub transport: TransportMode,
    pub tcp_port: u16,
    pub stop_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub service_module: String,
    /// Extra arguments appended to the service launch command.
    pub service_args: Vec<String>,
    /// Where crash reports are submitted. `None` disables submission.
    pub crash_endpoint: Option<String>,
    /// Overrides the default log directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::Stdio,
            tcp_port: DEFAULT_TCP_PORT,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            service_module: DEFAULT_SERVICE_MODULE.to_string(),
            service_args: Vec::new(),
            crash_endpoint: None,
            log_dir: None,
        }
    }
}

impl HostConfig {
    /// Load settings from `capstan.toml` in the workspace, falling back to
    /// the user config directory, falling back to defaults.
    #[must_use]
    pub fn discover(workspace_dir: &Path) -> Self {
        let workspace_file = workspace_dir.join("capstan.toml");
        if workspace_file.is_file() {
            return Self::load(&workspace_file);
        }
        if let Some(user_file) = dirs::config_dir().map(|dir| dir.join("capstan").join("capstan.toml"))
            && user_file.is_file()
        {
            return Self::load(&user_file);
        }
        Self::default()
    }

    /// Load settings from a specific file; defaults when unreadable.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), "Failed to read host config: {e}");
                return Self::default();
            }
        };
        match toml::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), "Malformed host config, using defaults: {e}");
                Self::default()
            }
        }
    }

    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_match_documented_values() {
        let config = HostConfig::default();
        assert_eq!(config.transport, TransportMode::Stdio);
        assert_eq!(config.tcp_port, 2087);
        assert_eq!(config.stop_timeout(), Duration::from_secs(2));
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.service_module, "capstan_server");
        assert!(config.crash_endpoint.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capstan.toml");
        fs::write(
            &path,
            "transport = \"tcp\"\ntcp_port = 9000\ncrash_endpoint = \"https://crash.example/api\"\n",
        )
        .unwrap();

        let config = HostConfig::load(&path);
        assert_eq!(config.transport, TransportMode::Tcp);
        assert_eq!(config.tcp_port, 9000);
        assert_eq!(
            config.crash_endpoint.as_deref(),
            Some("https://crash.example/api")
        );
        assert_eq!(config.stop_timeout_ms, DEFAULT_STOP_TIMEOUT_MS);
        assert_eq!(config.service_module, DEFAULT_SERVICE_MODULE);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capstan.toml");
        fs::write(&path, "transport = [broken").unwrap();
        assert_eq!(HostConfig::load(&path), HostConfig::default());
    }

    #[test]
    fn discover_prefers_workspace_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("capstan.toml"), "tcp_port = 4100\n").unwrap();
        let config = HostConfig::discover(dir.path());
        assert_eq!(config.tcp_port, 4100);
    }

    #[test]
    fn discover_without_files_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        // No workspace file; the user config dir may exist on the machine
        // running tests, so only assert when it does not shadow us.
        let config = HostConfig::discover(dir.path());
        assert_eq!(config.stop_timeout_ms, DEFAULT_STOP_TIMEOUT_MS);
    }
}
