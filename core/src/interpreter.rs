//! Interpreter probing.
//!
//! The service is bound to a Python interpreter at spawn time, so a bad
//! interpreter must be caught before any start. Probing runs
//! `<interpreter> --version` as a short-lived child under a timeout; the
//! probe never propagates an error, it reports invalid with the reason the
//! user should see.

use regex::Regex;
use semver::Version;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

static BANNER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").expect("banner regex"));

/// Oldest interpreter the service supports.
fn version_floor() -> Version {
    Version::new(3, 8, 0)
}

/// Outcome of probing a candidate interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterProbe {
    pub valid: bool,
    /// Parsed version when the banner was readable, present even for an
    /// interpreter rejected as too old.
    pub version: Option<Version>,
    /// Why the probe failed, phrased for the validation message.
    pub reason: Option<String>,
}

impl InterpreterProbe {
    fn valid(version: Version) -> Self {
        Self {
            valid: true,
            version: Some(version),
            reason: None,
        }
    }

    fn invalid(reason: String) -> Self {
        Self {
            valid: false,
            version: None,
            reason: Some(reason),
        }
    }
}

/// Probe `path` as an interpreter, bounded by `probe_timeout`.
///
/// A bare command name is resolved on `PATH` first. The spawned child is
/// killed when the timeout drops it.
pub async fn probe(path: &str, probe_timeout: Duration) -> InterpreterProbe {
    let command = path.trim();
    let command = if command.is_empty() {
        capstan_types::DEFAULT_INTERPRETER
    } else {
        command
    };

    let program = if command.contains(['/', '\\']) {
        PathBuf::from(command)
    } else {
        match which::which(command) {
            Ok(found) => found,
            Err(e) => {
                return InterpreterProbe::invalid(format!(
                    "interpreter '{command}' not found on PATH: {e}"
                ));
            }
        }
    };

    let mut cmd = Command::new(&program);
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match timeout(probe_timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return InterpreterProbe::invalid(format!(
                "failed to run {}: {e}",
                program.display()
            ));
        }
        Err(_) => {
            return InterpreterProbe::invalid(format!(
                "{} did not answer --version within {}ms",
                program.display(),
                probe_timeout.as_millis()
            ));
        }
    };

    // Older interpreters print the version banner to stderr.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let banner = if stdout.trim().is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        stdout.into_owned()
    };
    debug!(program = %program.display(), banner = banner.trim(), "Interpreter probe");

    match parse_banner(&banner) {
        Some(version) if version < version_floor() => InterpreterProbe {
            valid: false,
            reason: Some(format!(
                "interpreter reports {version}, older than the supported {}",
                version_floor()
            )),
            version: Some(version),
        },
        Some(version) => InterpreterProbe::valid(version),
        None => InterpreterProbe::invalid(format!(
            "could not read a version from {}: {:?}",
            program.display(),
            banner.trim()
        )),
    }
}

fn parse_banner(banner: &str) -> Option<Version> {
    let caps = BANNER_RE.captures(banner)?;
    let major = caps.get(1)?.as_str().parse().ok()?;
    let minor = caps.get(2)?.as_str().parse().ok()?;
    let patch = caps
        .get(3)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    Some(Version::new(major, minor, patch))
}
