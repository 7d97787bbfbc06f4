//! The versioned profile store.
//!
//! Profiles live in one global JSON file; the selection lives in a small
//! per-workspace file so two workspaces sharing the profile set can activate
//! different profiles. Loading fails soft: a missing or unreadable file
//! yields defaults instead of blocking startup. Migration happens at the raw
//! JSON level, where a field absent from an old record is distinguishable
//! from a field set to its default.

use capstan_types::{
    ConfigurationProfile, DEFAULT_INTERPRETER, ProfileField, ProfileId, Selection, diff_profiles,
};
use capstan_utils::{atomic_write, recover_bak_file};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Schema version written by this release.
///
/// v1 → v2 introduced `interpreter_path`, defaulting migrated records to
/// [`DEFAULT_INTERPRETER`].
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed store state: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("unknown profile id {0}")]
    UnknownProfile(ProfileId),
}

fn current_schema_version() -> u32 {
    SCHEMA_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GlobalState {
    #[serde(default = "current_schema_version")]
    schema_version: u32,
    #[serde(default)]
    next_id: u32,
    #[serde(default)]
    profiles: BTreeMap<ProfileId, ConfigurationProfile>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            next_id: 0,
            profiles: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct WorkspaceState {
    #[serde(default)]
    selection: Selection,
}

/// The profile store: global profile file plus per-workspace selection.
#[derive(Debug)]
pub struct ConfigStore {
    global_path: PathBuf,
    selection_path: PathBuf,
    state: GlobalState,
    selection: Selection,
}

impl ConfigStore {
    /// Default store locations: profiles under the user config directory,
    /// selection under the workspace.
    #[must_use]
    pub fn default_paths(workspace_dir: &Path) -> (PathBuf, PathBuf) {
        let global = dirs::config_dir()
            .map(|dir| dir.join("capstan").join("profiles.json"))
            .unwrap_or_else(|| workspace_dir.join(".capstan").join("profiles.json"));
        let selection = workspace_dir.join(".capstan").join("selection.json");
        (global, selection)
    }

    /// Load the store. Never fails: absent or corrupt files yield defaults
    /// (empty profile set, selection disabled, current schema version) with a
    /// warning, so a damaged store cannot block startup.
    #[must_use]
    pub fn open(global_path: impl Into<PathBuf>, selection_path: impl Into<PathBuf>) -> Self {
        let global_path = global_path.into();
        let selection_path = selection_path.into();

        let state = match read_json(&global_path) {
            Some(value) => match serde_json::from_value::<GlobalState>(value) {
                Ok(state) => state,
                Err(e) => {
                    warn!(
                        path = %global_path.display(),
                        "Profile store has an unusable shape, starting from defaults: {e}"
                    );
                    GlobalState::default()
                }
            },
            None => GlobalState::default(),
        };
        let selection = match read_json(&selection_path) {
            Some(value) => match serde_json::from_value::<WorkspaceState>(value) {
                Ok(workspace) => workspace.selection,
                Err(e) => {
                    warn!(
                        path = %selection_path.display(),
                        "Selection file has an unusable shape, starting disabled: {e}"
                    );
                    Selection::Disabled
                }
            },
            None => Selection::Disabled,
        };

        let mut store = Self {
            global_path,
            selection_path,
            state,
            selection,
        };
        store.enforce_selection_integrity();
        store
    }

    /// Bring the on-disk global state up to [`SCHEMA_VERSION`].
    ///
    /// Operates on the raw JSON: every profile record is checked against the
    /// current schema and absent fields get their schema defaults, then the
    /// new version is stamped and the file rewritten. No-op when the stored
    /// version already matches. Returns whether a write occurred. On failure
    /// the store stays usable at the old version; the caller logs and moves
    /// on.
    pub fn migrate(&mut self) -> Result<bool, StoreError> {
        let Some(mut value) = read_json(&self.global_path) else {
            return Ok(false);
        };
        if !value.is_object() {
            warn!(
                path = %self.global_path.display(),
                "Profile store is not a JSON object, skipping migration"
            );
            return Ok(false);
        }

        let stored = stored_schema_version(&value);
        if stored >= SCHEMA_VERSION {
            return Ok(false);
        }

        let filled = fill_missing_profile_fields(&mut value);
        if let Some(root) = value.as_object_mut() {
            root.insert(
                "schema_version".to_string(),
                Value::from(u64::from(SCHEMA_VERSION)),
            );
        }

        let state: GlobalState = serde_json::from_value(value.clone())?;
        persist_json(&self.global_path, &value)?;
        self.state = state;
        self.enforce_selection_integrity();
        info!(
            from = stored,
            to = SCHEMA_VERSION,
            filled, "Migrated profile store"
        );
        Ok(true)
    }

    /// Upsert a profile. Returns the ordered set of restart-relevant fields
    /// that differ from the previously stored record; empty for a brand-new
    /// profile or an edit the service does not observe.
    pub fn save(&mut self, profile: ConfigurationProfile) -> Result<Vec<ProfileField>, StoreError> {
        let change_set = self
            .state
            .profiles
            .get(&profile.id)
            .map(|old| diff_profiles(old, &profile))
            .unwrap_or_default();
        self.state.profiles.insert(profile.id, profile);
        self.persist_global()?;
        Ok(change_set)
    }

    /// Remove a profile. Returns whether the selection referred to it and was
    /// reset to disabled.
    pub fn delete(&mut self, id: ProfileId) -> Result<bool, StoreError> {
        if self.state.profiles.remove(&id).is_none() {
            return Err(StoreError::UnknownProfile(id));
        }
        let cleared = self.selection == Selection::Profile(id);
        if cleared {
            self.selection = Selection::Disabled;
            self.persist_selection()?;
        }
        self.persist_global()?;
        Ok(cleared)
    }

    /// Allocate the next profile id. Ids are handed out monotonically and
    /// never reused, even after the profile is deleted.
    pub fn next_id(&mut self) -> Result<ProfileId, StoreError> {
        let id = ProfileId::new(self.state.next_id);
        self.state.next_id += 1;
        self.persist_global()?;
        Ok(id)
    }

    /// Allocate an id and persist a fresh profile named for it.
    pub fn add_profile(&mut self) -> Result<ConfigurationProfile, StoreError> {
        let id = self.next_id()?;
        let profile = ConfigurationProfile::new(id);
        self.save(profile.clone())?;
        Ok(profile)
    }

    /// Change the workspace selection. A profile selection must refer to an
    /// existing profile.
    pub fn select(&mut self, selection: Selection) -> Result<(), StoreError> {
        if let Selection::Profile(id) = selection
            && !self.state.profiles.contains_key(&id)
        {
            return Err(StoreError::UnknownProfile(id));
        }
        self.selection = selection;
        self.persist_selection()
    }

    #[must_use]
    pub fn selection(&self) -> Selection {
        self.selection
    }

    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.state.schema_version
    }

    #[must_use]
    pub fn profile(&self, id: ProfileId) -> Option<&ConfigurationProfile> {
        self.state.profiles.get(&id)
    }

    /// The profile the selection points at, when not disabled.
    #[must_use]
    pub fn selected_profile(&self) -> Option<&ConfigurationProfile> {
        self.selection.profile_id().and_then(|id| self.profile(id))
    }

    /// All profiles in id order.
    pub fn profiles(&self) -> impl Iterator<Item = &ConfigurationProfile> {
        self.state.profiles.values()
    }

    #[must_use]
    pub fn profile_count(&self) -> usize {
        self.state.profiles.len()
    }

    fn enforce_selection_integrity(&mut self) {
        if let Selection::Profile(id) = self.selection
            && !self.state.profiles.contains_key(&id)
        {
            warn!(%id, "Selection refers to a missing profile, resetting to disabled");
            self.selection = Selection::Disabled;
            if let Err(e) = self.persist_selection() {
                warn!("Failed to persist selection reset: {e}");
            }
        }
    }

    fn persist_global(&self) -> Result<(), StoreError> {
        let value = serde_json::to_value(&self.state)?;
        persist_json(&self.global_path, &value)
    }

    fn persist_selection(&self) -> Result<(), StoreError> {
        let value = serde_json::to_value(WorkspaceState {
            selection: self.selection,
        })?;
        persist_json(&self.selection_path, &value)
    }
}

/// Read and parse a JSON file, recovering an interrupted atomic write first.
/// Returns `None` (with a warning) when the file is absent or unreadable.
fn read_json(path: &Path) -> Option<Value> {
    recover_bak_file(path);
    if !path.exists() {
        return None;
    }
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), "Failed to read store file: {e}");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), "Store file is not valid JSON: {e}");
            None
        }
    }
}

fn persist_json(path: &Path, value: &Value) -> Result<(), StoreError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    atomic_write(path, &bytes).map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn stored_schema_version(value: &Value) -> u32 {
    // Records written before versioning count as the oldest schema.
    value
        .get("schema_version")
        .and_then(Value::as_u64)
        .map_or(1, |v| v as u32)
}

/// Insert schema defaults for fields the stored records predate. Returns the
/// number of fields added.
fn fill_missing_profile_fields(value: &mut Value) -> usize {
    let defaults: [(&str, Value); 5] = [
        ("project_path", Value::from("")),
        ("auxiliary_paths", Value::Array(Vec::new())),
        ("interpreter_path", Value::from(DEFAULT_INTERPRETER)),
        ("resolved_project_path", Value::Null),
        ("resolved_version", Value::Null),
    ];

    let mut filled = 0;
    let Some(profiles) = value.get_mut("profiles").and_then(Value::as_object_mut) else {
        return 0;
    };
    for record in profiles.values_mut() {
        let Some(record) = record.as_object_mut() else {
            continue;
        };
        for (field, default) in &defaults {
            if !record.contains_key(*field) {
                record.insert((*field).to_string(), default.clone());
                filled += 1;
            }
        }
    }
    filled
}
