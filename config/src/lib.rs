//! Configuration persistence for Capstan.
//!
//! Two layers live here. [`store`] is the versioned profile store: named
//! configuration profiles in a global file plus the per-workspace selection,
//! with schema migration at load time. [`host`] is the host-side settings
//! file (`capstan.toml`): transport mode, timeouts, crash endpoint.

pub mod host;
pub mod store;

pub use host::{HostConfig, TransportMode};
pub use store::{ConfigStore, SCHEMA_VERSION, StoreError};
