//! Capstan CLI - workspace host for the service lifecycle orchestrator.
//!
//! The binary wires the pieces together and then gets out of the way:
//!
//! ```text
//! main() -> tracing init -> HostConfig::discover -> ConfigStore::open/migrate
//!                                   |
//!                                   v
//!                     Orchestrator::run (owns the session)
//!                                   |
//!          ctrl-c -> handle.shutdown() -> orderly service stop -> exit
//! ```
//!
//! On launch the orchestrator applies the persisted selection, so a workspace
//! that had a profile active gets its service back with no further input.
//! Status transitions are rendered to the log.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use capstan_config::{ConfigStore, HostConfig, SCHEMA_VERSION};
use capstan_core::EnvironmentResolver;
use capstan_engine::{CrashReporter, LogOnlyPrompt, Orchestrator};

/// Service session logs older than this are deleted at startup.
const LOG_RETENTION: Duration = Duration::from_secs(2 * 24 * 60 * 60);

fn init_tracing() {
    let env_filter = EnvFilter::try_from_env("CAPSTAN_LOG")
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    let (log_file, init_warnings) = open_capstan_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(fmt::layer().with_writer(std::io::stderr).without_time())
            .with(env_filter)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            warn!("{warning}");
        }
        return;
    }

    // No writable log file anywhere; stderr alone is better than silence.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).without_time())
        .with(env_filter)
        .init();
    for warning in init_warnings {
        warn!("{warning}");
    }
}

fn open_capstan_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let candidates = capstan_log_file_candidates();
    let mut warnings = Vec::new();

    for candidate in candidates {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn capstan_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: <data dir>/capstan/logs/capstan.log
    if let Some(dir) = default_log_dir() {
        candidates.push(dir.join("capstan.log"));
    }

    // Fallback: ./.capstan/logs/capstan.log (useful in constrained environments)
    candidates.push(PathBuf::from(".capstan").join("logs").join("capstan.log"));

    candidates
}

fn default_log_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("capstan").join("logs"))
}

/// Delete service session logs past the retention window. The CLI's own
/// `capstan.log` is append-only and never pruned.
fn prune_session_logs(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let now = SystemTime::now();
    let mut removed = 0usize;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with("service-") || !name.ends_with(".log") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let Ok(age) = now.duration_since(modified) else {
            continue;
        };
        if age > LOG_RETENTION {
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(path = %entry.path().display(), "Failed to prune session log: {e}");
                }
            }
        }
    }
    if removed > 0 {
        info!("Pruned {removed} stale service session logs");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let workspace_root = std::env::current_dir().context("reading current directory")?;
    let host = HostConfig::discover(&workspace_root);

    let log_dir = host.log_dir.clone().or_else(default_log_dir);
    if let Some(dir) = &log_dir {
        if let Err(e) = fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), "Failed to create log directory: {e}");
        } else {
            prune_session_logs(dir);
        }
    }

    let (global_path, selection_path) = ConfigStore::default_paths(&workspace_root);
    let mut store = ConfigStore::open(global_path, selection_path);
    match store.migrate() {
        Ok(true) => info!("Profile store migrated to schema v{SCHEMA_VERSION}"),
        Ok(false) => {}
        Err(e) => warn!("Profile store migration failed, continuing unmigrated: {e}"),
    }

    let resolver = EnvironmentResolver::new(host.probe_timeout());
    let reporter = CrashReporter::new(
        Arc::new(LogOnlyPrompt),
        host.crash_endpoint.clone(),
        log_dir.clone(),
    );
    let (orchestrator, handle, mut status) =
        Orchestrator::new(store, host, resolver, reporter, workspace_root, log_dir);
    let engine = tokio::spawn(orchestrator.run());

    let status_task = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let update = status.borrow_and_update().clone();
            if update.loading {
                info!("Status: {} (loading)", update.label);
            } else {
                info!("Status: {}", update.label);
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;
    info!("Interrupt received, shutting down");

    handle.shutdown().await?;
    engine.await?;
    let _ = status_task.await;

    Ok(())
}
