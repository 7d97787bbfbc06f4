//! Integration test modules

mod store;

// The lifecycle suite drives a real orchestrator against the loopback fake
// service; the interpreter stub is a shell script, so unix only.
#[cfg(unix)]
mod lifecycle;
