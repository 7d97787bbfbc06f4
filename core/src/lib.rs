//! Environment resolution for Capstan.
//!
//! Before the lifecycle controller starts the service it has to know two
//! things: whether the configured interpreter is a runnable, recent-enough
//! Python, and where the project actually lives. This crate answers both.
//! Interpreter probing spawns `<interpreter> --version` under a timeout;
//! project and auxiliary-path resolution expand template placeholders and
//! walk ancestor directories for markers.

pub mod interpreter;
pub mod project;
pub mod template;

pub use interpreter::InterpreterProbe;
pub use project::ResolvedProject;
pub use template::{TemplateError, TemplateVars};

use std::path::PathBuf;
use std::time::Duration;

/// Validates interpreters and resolves project/auxiliary paths.
#[derive(Debug, Clone)]
pub struct EnvironmentResolver {
    probe_timeout: Duration,
}

impl EnvironmentResolver {
    #[must_use]
    pub fn new(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }

    /// Probe `path` as a service interpreter. Spawns one short-lived
    /// `--version` child; a hang longer than the configured timeout counts
    /// as invalid.
    pub async fn resolve_interpreter(&self, path: &str) -> InterpreterProbe {
        interpreter::probe(path, self.probe_timeout).await
    }

    /// Expand placeholders in `path` and find the nearest marker-bearing
    /// directory, walking upward from the expanded path itself.
    ///
    /// `Ok(None)` means no ancestor up to the filesystem root qualifies;
    /// `Err` means the template itself was invalid.
    pub fn resolve_project(
        &self,
        path: &str,
        vars: &TemplateVars,
    ) -> Result<Option<ResolvedProject>, TemplateError> {
        let expanded = vars.expand(path)?;
        Ok(project::find_project_root(PathBuf::from(expanded).as_path()))
    }

    /// Expand placeholders in `path` and find the nearest ancestor that holds
    /// at least one service module.
    pub fn resolve_auxiliary_path(
        &self,
        path: &str,
        vars: &TemplateVars,
    ) -> Result<Option<PathBuf>, TemplateError> {
        let expanded = vars.expand(path)?;
        Ok(project::find_module_root(PathBuf::from(expanded).as_path()))
    }
}
