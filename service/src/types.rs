//! Public types for launching and observing a service session.

use std::fmt;
use std::path::PathBuf;

use capstan_types::{CrashInfo, LoadingState};

/// How the byte stream to the service is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Spawn the interpreter as a child process and speak over its stdio.
    Stdio,
    /// Connect to a service already listening on the loopback interface,
    /// typically one started by hand with a debugger attached.
    Tcp { port: u16 },
}

/// Everything needed to launch one service session.
///
/// The interpreter is the configured value, either an absolute path or a bare
/// name resolved against `PATH` at spawn time.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub interpreter: String,
    pub module: String,
    pub args: Vec<String>,
    pub transport: Transport,
    pub log_file: Option<PathBuf>,
}

impl LaunchSpec {
    #[must_use]
    pub fn new(interpreter: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            module: module.into(),
            args: Vec::new(),
            transport: Transport::Stdio,
            log_file: None,
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn with_log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }
}

/// Why the reader task stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The service closed its side of the stream.
    Closed,
    /// The stream broke or produced unreadable frames.
    Failed(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("stream closed"),
            Self::Failed(message) => f.write_str(message),
        }
    }
}

/// Traffic surfaced by a running service, delivered on the session's event
/// channel.
#[derive(Debug)]
pub enum ServiceEvent {
    /// `$capstan/loadingStatusUpdate` — the service entered or left its
    /// loading phase.
    LoadingStateChanged(LoadingState),
    /// `capstan/displayCrashNotification` — the service reported an
    /// unrecoverable failure.
    Crashed(CrashInfo),
    /// `capstan/getConfiguration` — the service asked for the active
    /// configuration. The holder of the session answers with
    /// [`respond_configuration`](crate::ServiceClient::respond_configuration).
    ConfigurationRequested { request_id: serde_json::Value },
    /// The wire went away without a stop being requested.
    Exited(ExitReason),
}
