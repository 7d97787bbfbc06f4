//! Shared test utilities and fixtures
//!
//! Common infrastructure for integration tests: a scriptable fake service
//! listening on the loopback interface, a workspace fixture with a stub
//! interpreter and a marked project directory, and orchestrator wiring.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};

use capstan_config::{ConfigStore, HostConfig, TransportMode};
use capstan_core::EnvironmentResolver;
use capstan_engine::{CrashReporter, LogOnlyPrompt, Orchestrator, OrchestratorHandle};
use capstan_service::codec::{FrameReader, FrameWriter};
use capstan_types::StatusUpdate;

/// A language service stand-in on a loopback port.
///
/// Sessions are served one at a time, so the event log reflects the order
/// the orchestrator drove them in: `connect`, the wire methods it saw, and
/// `close` when the session's stream ended.
pub struct FakeService {
    pub port: u16,
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeService {
    /// A well-behaved service: answers the shutdown handshake, reports its
    /// loading phase after `clientReady`.
    pub async fn spawn() -> Self {
        Self::spawn_with(true).await
    }

    /// A wedged service: completes startup but never answers `shutdown`,
    /// forcing the orchestrator's stop timeout.
    pub async fn spawn_unresponsive() -> Self {
        Self::spawn_with(false).await
    }

    async fn spawn_with(answer_shutdown: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake service");
        let port = listener.local_addr().expect("local addr").port();
        let log = Arc::new(Mutex::new(Vec::new()));
        let task_log = log.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                serve_session(stream, &task_log, answer_shutdown).await;
            }
        });
        Self { port, log }
    }

    pub async fn events(&self) -> Vec<String> {
        self.log.lock().await.clone()
    }

    pub async fn count(&self, event: &str) -> usize {
        self.log
            .lock()
            .await
            .iter()
            .filter(|e| e.as_str() == event)
            .count()
    }

    /// Block until `event` has been logged at least `times` times.
    pub async fn wait_for(&self, event: &str, times: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if self.count(event).await >= times {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "fake service never saw {event} x{times}; log: {:?}",
                self.events().await
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn serve_session(stream: TcpStream, log: &Mutex<Vec<String>>, answer_shutdown: bool) {
    log.lock().await.push("connect".to_string());
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let mut writer = FrameWriter::new(write_half);
    loop {
        let frame = match reader.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) | Err(_) => break,
        };
        let method = frame["method"].as_str().unwrap_or_default().to_string();
        match method.as_str() {
            "capstan/clientReady" => {
                log.lock().await.push("clientReady".to_string());
                let _ = writer.write_frame(&loading_update("start")).await;
                let _ = writer.write_frame(&loading_update("stop")).await;
            }
            "capstan/configurationChanged" => {
                log.lock().await.push("configurationChanged".to_string());
            }
            "shutdown" => {
                log.lock().await.push("shutdown".to_string());
                if answer_shutdown {
                    let reply = serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": frame["id"],
                        "result": null,
                    });
                    let _ = writer.write_frame(&reply).await;
                }
            }
            "exit" => {
                log.lock().await.push("exit".to_string());
                break;
            }
            _ => {}
        }
    }
    log.lock().await.push("close".to_string());
}

fn loading_update(state: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": "$capstan/loadingStatusUpdate",
        "params": {"state": state}
    })
}

/// Temp workspace with an interpreter stub and a marked project directory.
pub struct TestWorkspace {
    pub dir: TempDir,
    pub interpreter: PathBuf,
    pub project: PathBuf,
}

#[cfg(unix)]
pub fn test_workspace() -> TestWorkspace {
    let dir = tempfile::tempdir().expect("tempdir");
    let interpreter = write_interpreter_stub(dir.path(), "python-stub", "Python 3.11.4");
    let project = dir.path().join("srv");
    std::fs::create_dir_all(&project).expect("project dir");
    std::fs::write(
        project.join("release.py"),
        "version_info = (16, 3, 0, FINAL, 0, '')\n",
    )
    .expect("version marker");
    TestWorkspace {
        dir,
        interpreter,
        project,
    }
}

/// A shell script that answers `--version` with `banner`.
#[cfg(unix)]
pub fn write_interpreter_stub(dir: &Path, name: &str, banner: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\necho \"{banner}\"\n")).expect("write stub");
    let mut perms = std::fs::metadata(&path).expect("stub metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("stub permissions");
    path
}

pub fn store_in(dir: &Path) -> ConfigStore {
    ConfigStore::open(dir.join("profiles.json"), dir.join("selection.json"))
}

/// Host settings pointed at a loopback fake service, with a short stop
/// timeout so hard-stop tests finish quickly.
pub fn tcp_host(port: u16) -> HostConfig {
    HostConfig {
        transport: TransportMode::Tcp,
        tcp_port: port,
        stop_timeout_ms: 500,
        ..HostConfig::default()
    }
}

pub fn orchestrator_with(
    workspace_root: &Path,
    store: ConfigStore,
    host: HostConfig,
) -> (
    Orchestrator,
    OrchestratorHandle,
    watch::Receiver<StatusUpdate>,
) {
    let resolver = EnvironmentResolver::new(Duration::from_secs(5));
    let reporter = CrashReporter::new(Arc::new(LogOnlyPrompt), None, None);
    Orchestrator::new(
        store,
        host,
        resolver,
        reporter,
        workspace_root.to_path_buf(),
        None,
    )
}

/// The status indicator shows a running session: a profile label with the
/// spinner off.
pub fn running(update: &StatusUpdate) -> bool {
    !update.loading && update.label != "idle" && update.label != "disabled"
}

/// Block until the status watch satisfies `predicate`.
pub async fn wait_status(
    rx: &mut watch::Receiver<StatusUpdate>,
    what: &str,
    predicate: impl FnMut(&StatusUpdate) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for status: {what}"))
        .expect("status channel closed");
}
