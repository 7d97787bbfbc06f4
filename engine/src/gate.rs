//! Transition gate for the stop window.
//!
//! The controller runs one transition at a time. While a stop is in flight
//! the store still accepts writes, but the lifecycle reaction to each write
//! is parked here instead of executing. The slot holds at most one entry;
//! a newer request supersedes an older one, and when the gate reopens the
//! controller re-reads the store rather than replaying the request verbatim,
//! so a burst of edits collapses into the state the last one calls for.

use std::fmt;

/// Kind of transition request parked in the replay slot. The data half of
/// the request is already persisted; this only labels what deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeferredTransition {
    Selection,
    ProfileEdit,
    ProfileDelete,
    InterpreterChange,
}

impl fmt::Display for DeferredTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Selection => "selection change",
            Self::ProfileEdit => "profile edit",
            Self::ProfileDelete => "profile delete",
            Self::InterpreterChange => "interpreter change",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
pub(crate) struct TransitionGate {
    accepting: bool,
    deferred: Option<DeferredTransition>,
}

impl TransitionGate {
    pub(crate) fn new() -> Self {
        Self {
            accepting: true,
            deferred: None,
        }
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub(crate) fn close(&mut self) {
        self.accepting = false;
    }

    /// Park a transition until the gate reopens. Latest wins.
    pub(crate) fn defer(&mut self, kind: DeferredTransition) {
        debug_assert!(!self.accepting, "deferred a transition on an open gate");
        if let Some(previous) = self.deferred.replace(kind) {
            tracing::debug!("Deferred {previous} superseded by {kind}");
        }
    }

    /// Reopen the gate and hand back the parked transition, if any.
    pub(crate) fn reopen(&mut self) -> Option<DeferredTransition> {
        self.accepting = true;
        self.deferred.take()
    }
}
