//! Configuration profiles and the workspace selection.
//!
//! A profile is a named, persisted set of project/interpreter settings. The
//! selection is the profile id currently active for a workspace, or disabled.
//! Both types define the persisted shape; the store in `capstan-config` owns
//! reading and writing them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Interpreter command used when a profile leaves `interpreter_path` empty
/// and no ambient interpreter has been announced.
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Identity of a configuration profile. Assigned from a persisted counter,
/// monotonically increasing, never reused after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(u32);

impl ProfileId {
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named, persisted configuration profile.
///
/// `project_path` and `auxiliary_paths` may contain `${workspaceFolder}` /
/// `${userHome}` placeholders; they are stored unexpanded. The two `resolved_*`
/// fields are recomputed by the caller of `save` via the environment resolver
/// and cached here for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationProfile {
    pub id: ProfileId,
    pub name: String,
    #[serde(default)]
    pub project_path: String,
    #[serde(default)]
    pub auxiliary_paths: Vec<String>,
    #[serde(default)]
    pub interpreter_path: String,
    #[serde(default)]
    pub resolved_project_path: Option<PathBuf>,
    #[serde(default)]
    pub resolved_version: Option<String>,
}

impl ConfigurationProfile {
    /// A fresh profile with the default name for its id.
    #[must_use]
    pub fn new(id: ProfileId) -> Self {
        Self {
            id,
            name: format!("New Configuration {id}"),
            project_path: String::new(),
            auxiliary_paths: Vec::new(),
            interpreter_path: String::new(),
            resolved_project_path: None,
            resolved_version: None,
        }
    }

    /// The interpreter this profile binds to: its own `interpreter_path` if
    /// set, otherwise the ambient interpreter announced by the environment,
    /// otherwise [`DEFAULT_INTERPRETER`].
    #[must_use]
    pub fn effective_interpreter(&self, ambient: Option<&str>) -> String {
        if !self.interpreter_path.trim().is_empty() {
            return self.interpreter_path.clone();
        }
        match ambient {
            Some(path) if !path.trim().is_empty() => path.to_string(),
            _ => DEFAULT_INTERPRETER.to_string(),
        }
    }

    /// Whether this profile relies on the ambient interpreter rather than a
    /// pinned `interpreter_path`.
    #[must_use]
    pub fn uses_ambient_interpreter(&self) -> bool {
        self.interpreter_path.trim().is_empty()
    }

    /// Status label for this profile: the name, plus the resolved service
    /// version when one is known.
    #[must_use]
    pub fn status_label(&self) -> String {
        match &self.resolved_version {
            Some(version) => format!("{} ({version})", self.name),
            None => self.name.clone(),
        }
    }
}

/// The active profile for a workspace, or disabled.
///
/// Persisted as a plain integer, `-1` meaning disabled, so selection files
/// stay readable by older releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "i64", into = "i64")]
pub enum Selection {
    #[default]
    Disabled,
    Profile(ProfileId),
}

impl Selection {
    #[must_use]
    pub fn profile_id(self) -> Option<ProfileId> {
        match self {
            Self::Disabled => None,
            Self::Profile(id) => Some(id),
        }
    }

    #[must_use]
    pub fn is_disabled(self) -> bool {
        matches!(self, Self::Disabled)
    }
}

impl From<i64> for Selection {
    fn from(raw: i64) -> Self {
        if raw < 0 {
            Self::Disabled
        } else {
            Self::Profile(ProfileId::new(raw as u32))
        }
    }
}

impl From<Selection> for i64 {
    fn from(selection: Selection) -> Self {
        match selection {
            Selection::Disabled => -1,
            Selection::Profile(id) => i64::from(id.value()),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Profile(id) => write!(f, "profile {id}"),
        }
    }
}
