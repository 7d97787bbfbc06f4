//! Change classification for profile edits.
//!
//! The lifecycle controller decides restart-vs-notify from one place. The
//! rule: a different interpreter means the running service is bound to the
//! wrong binary and must be restarted; project or auxiliary path edits can be
//! pushed to a running service as a configuration-changed notification.

use crate::profile::ConfigurationProfile;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A profile field whose edit the lifecycle controller cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    ProjectPath,
    InterpreterPath,
    AuxiliaryPaths,
}

impl ProfileField {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::ProjectPath => "project_path",
            Self::InterpreterPath => "interpreter_path",
            Self::AuxiliaryPaths => "auxiliary_paths",
        }
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a profile edit means for a running service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeImpact {
    /// The service must be stopped and started again.
    RestartRequired,
    /// The running service can absorb the change via a notification.
    LiveUpdate,
    /// Nothing the service observes has changed.
    NoOp,
}

/// Ordered set of fields that differ between two revisions of a profile.
/// Order follows field declaration order; each field appears at most once.
#[must_use]
pub fn diff_profiles(
    old: &ConfigurationProfile,
    new: &ConfigurationProfile,
) -> Vec<ProfileField> {
    let mut changed = Vec::new();
    if old.project_path != new.project_path {
        changed.push(ProfileField::ProjectPath);
    }
    if old.interpreter_path != new.interpreter_path {
        changed.push(ProfileField::InterpreterPath);
    }
    if old.auxiliary_paths != new.auxiliary_paths {
        changed.push(ProfileField::AuxiliaryPaths);
    }
    changed
}

/// Classify an already-computed change set.
#[must_use]
pub fn classify_fields(fields: &[ProfileField]) -> ChangeImpact {
    if fields.contains(&ProfileField::InterpreterPath) {
        ChangeImpact::RestartRequired
    } else if fields.is_empty() {
        ChangeImpact::NoOp
    } else {
        ChangeImpact::LiveUpdate
    }
}

/// Classify the edit from `old` to `new`.
#[must_use]
pub fn classify_change(
    old: &ConfigurationProfile,
    new: &ConfigurationProfile,
) -> ChangeImpact {
    classify_fields(&diff_profiles(old, new))
}
