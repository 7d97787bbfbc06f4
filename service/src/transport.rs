//! Establishes the service byte stream.
//!
//! Stdio mode spawns `<interpreter> -m <module>` with piped stdin/stdout;
//! TCP mode attaches to a service someone already started on the loopback
//! interface. Both yield the same reader/writer pair, so the client above
//! never cares which one it got.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use crate::types::{LaunchSpec, Transport};

pub(crate) type StreamReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type StreamWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub(crate) struct ServiceIo {
    pub reader: StreamReader,
    pub writer: StreamWriter,
    /// Present in stdio mode. `None` means nobody owns the peer process.
    pub child: Option<Child>,
}

pub(crate) async fn establish(spec: &LaunchSpec) -> Result<ServiceIo> {
    match spec.transport {
        Transport::Stdio => spawn_child(spec),
        Transport::Tcp { port } => connect_loopback(port).await,
    }
}

fn spawn_child(spec: &LaunchSpec) -> Result<ServiceIo> {
    let program = resolve_program(&spec.interpreter)?;

    let mut cmd = Command::new(&program);
    cmd.arg("-m").arg(&spec.module);
    if let Some(log_file) = &spec.log_file {
        cmd.arg("--log-file").arg(log_file);
    }
    cmd.args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning {}", program.display()))?;

    let stdout = child.stdout.take().context("no stdout from service child")?;
    let stdin = child.stdin.take().context("no stdin from service child")?;

    Ok(ServiceIo {
        reader: Box::new(stdout),
        writer: Box::new(stdin),
        child: Some(child),
    })
}

/// Bare names go through a `PATH` lookup so a missing interpreter fails
/// here with a clear message instead of as an opaque spawn error.
fn resolve_program(interpreter: &str) -> Result<PathBuf> {
    if interpreter.contains(['/', '\\']) {
        Ok(PathBuf::from(interpreter))
    } else {
        which::which(interpreter).with_context(|| format!("{interpreter} not found in PATH"))
    }
}

async fn connect_loopback(port: u16) -> Result<ServiceIo> {
    let stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .with_context(|| format!("connecting to service on 127.0.0.1:{port}"))?;
    let (read_half, write_half) = stream.into_split();

    Ok(ServiceIo {
        reader: Box::new(read_half),
        writer: Box::new(write_half),
        child: None,
    })
}
