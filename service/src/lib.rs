//! Client side of the language service boundary.
//!
//! This crate owns everything between the lifecycle engine and the service
//! process: launching it (or attaching over TCP), framing the JSON-RPC
//! wire, and translating service traffic into [`ServiceEvent`]s for the
//! engine to consume.

pub mod codec;
pub mod types;

pub(crate) mod protocol;

mod client;
mod transport;

pub use client::ServiceClient;
pub use types::{ExitReason, LaunchSpec, ServiceEvent, Transport};
