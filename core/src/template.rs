//! Template placeholder expansion for profile paths.
//!
//! Profiles store paths like `${workspaceFolder}/server` so one profile works
//! across machines. Exactly two placeholders exist: `${workspaceFolder}` and
//! `${userHome}`. Anything else is a validation error naming the placeholder,
//! surfaced to the user instead of silently starting with a bad path.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z][A-Za-z0-9_]*)\}").expect("placeholder regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown placeholder ${{{0}}}")]
    UnknownPlaceholder(String),
    #[error("placeholder ${{{0}}} has no value in this environment")]
    UnavailablePlaceholder(String),
}

/// Substitution values for profile path templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    workspace_folder: Option<PathBuf>,
    user_home: Option<PathBuf>,
}

impl TemplateVars {
    /// Vars for a concrete workspace: its root plus the user's home directory
    /// when the platform reports one.
    #[must_use]
    pub fn for_workspace(workspace: &Path) -> Self {
        Self {
            workspace_folder: Some(workspace.to_path_buf()),
            user_home: dirs::home_dir(),
        }
    }

    #[must_use]
    pub fn with_workspace_folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace_folder = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_user_home(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_home = Some(path.into());
        self
    }

    /// Expand every placeholder in `input`.
    pub fn expand(&self, input: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(input.len());
        let mut last = 0;
        for caps in PLACEHOLDER_RE.captures_iter(input) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&input[last..whole.start()]);
            out.push_str(&self.lookup(name.as_str())?);
            last = whole.end();
        }
        out.push_str(&input[last..]);
        Ok(out)
    }

    fn lookup(&self, name: &str) -> Result<String, TemplateError> {
        let value = match name {
            "workspaceFolder" => self.workspace_folder.as_ref(),
            "userHome" => self.user_home.as_ref(),
            _ => return Err(TemplateError::UnknownPlaceholder(name.to_string())),
        };
        value
            .map(|path| path.to_string_lossy().into_owned())
            .ok_or_else(|| TemplateError::UnavailablePlaceholder(name.to_string()))
    }
}
