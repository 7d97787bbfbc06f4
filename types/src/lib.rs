//! Core domain types for Capstan.
//!
//! Pure domain types with no IO and no async: configuration profiles, the
//! selection, change classification, and lifecycle states. Everything here
//! can be used from any layer of the workspace.

pub mod change;
pub mod profile;
pub mod state;

pub use change::{ChangeImpact, ProfileField, classify_change, classify_fields, diff_profiles};
pub use profile::{ConfigurationProfile, DEFAULT_INTERPRETER, ProfileId, Selection};
pub use state::{CrashInfo, LifecycleState, LoadingState, ServiceStatus, StatusUpdate};
