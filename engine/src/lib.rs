//! Lifecycle orchestration for Capstan.
//!
//! The [`Orchestrator`] owns the profile store, the environment resolver,
//! and the service session, and advances a five-state machine (idle,
//! starting, running, stopping, disabled) in response to host and service
//! events. The host drives it through an [`OrchestratorHandle`] and renders
//! the status watch it publishes; crashes are routed to a [`CrashReporter`].

mod diagnostics;
mod events;
mod gate;
mod orchestrator;

pub use diagnostics::{CrashPrompt, CrashReporter, LogOnlyPrompt, PromptChoice};
pub use events::OrchestratorHandle;
pub use orchestrator::Orchestrator;
