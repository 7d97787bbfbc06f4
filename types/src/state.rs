//! Lifecycle and service states shared between the engine and its consumers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the lifecycle controller.
///
/// `Idle` means no profile is selected (or the last session ended); `Disabled`
/// means the user explicitly switched the service off. The distinction only
/// matters for the status surface; both accept a `select` to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    Disabled,
}

impl LifecycleState {
    /// Whether a transition request must be deferred rather than acted on.
    #[must_use]
    pub fn is_stopping(self) -> bool {
        matches!(self, Self::Stopping)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Status of a service process handle, tracked by the client that owns the
/// child process or socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceStatus {
    #[default]
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Loading phase reported by the service over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingState {
    Started,
    Stopped,
}

impl LoadingState {
    /// Parse the wire value carried by `$capstan/loadingStatusUpdate`.
    ///
    /// Returns `None` for values outside the protocol; callers decide the
    /// fallback policy.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "start" => Some(Self::Started),
            "stop" => Some(Self::Stopped),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Started => "start",
            Self::Stopped => "stop",
        }
    }
}

/// What the status indicator shows: a label and whether to spin.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusUpdate {
    pub label: String,
    pub loading: bool,
}

impl StatusUpdate {
    /// Compose the indicator for a controller state. `profile_label` is the
    /// selected profile's display label when one is selected.
    #[must_use]
    pub fn for_state(state: LifecycleState, profile_label: Option<&str>) -> Self {
        let name = profile_label.unwrap_or("service");
        match state {
            LifecycleState::Idle => Self {
                label: "idle".to_string(),
                loading: false,
            },
            LifecycleState::Disabled => Self {
                label: "disabled".to_string(),
                loading: false,
            },
            LifecycleState::Starting | LifecycleState::Stopping => Self {
                label: name.to_string(),
                loading: true,
            },
            LifecycleState::Running => Self {
                label: name.to_string(),
                loading: false,
            },
        }
    }
}

/// Context captured when the service dies or a component fails, handed to the
/// diagnostics reporter.
///
/// Field names follow the wire's camelCase convention so the struct can be
/// read straight out of a `capstan/displayCrashNotification` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashInfo {
    /// The operation in flight when the failure surfaced (e.g. "start",
    /// "notification").
    pub operation: String,
    /// Human-readable error description.
    pub error: String,
    /// Path of the document the user had focused, when known.
    #[serde(default)]
    pub active_document: Option<String>,
}

impl CrashInfo {
    #[must_use]
    pub fn new(operation: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            error: error.into(),
            active_document: None,
        }
    }

    #[must_use]
    pub fn with_active_document(mut self, document: impl Into<String>) -> Self {
        self.active_document = Some(document.into());
        self
    }
}
