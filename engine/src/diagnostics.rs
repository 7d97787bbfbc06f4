//! Crash reporting.
//!
//! When the service reports a fatal error the controller hands the crash to
//! a [`CrashReporter`]: ask the host surface what to do, then bundle the
//! error with environment context and the tail of the newest service log and
//! POST it to the configured endpoint. Reporting never feeds errors back
//! into the lifecycle; every failure here is logged and dropped.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use capstan_types::CrashInfo;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Lines of the newest service log bundled into a report.
const LOG_TAIL_LINES: usize = 100;

/// What the user picked on the crash dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptChoice {
    SendReport,
    OpenLogs,
    Dismiss,
}

/// Host surface for the crash dialog. The host decides how, or whether, to
/// actually ask; the controller only consumes the choice.
pub trait CrashPrompt: Send + Sync {
    fn choose(&self, info: &CrashInfo) -> PromptChoice;
}

/// Headless default: log the crash and dismiss the dialog.
pub struct LogOnlyPrompt;

impl CrashPrompt for LogOnlyPrompt {
    fn choose(&self, info: &CrashInfo) -> PromptChoice {
        warn!(operation = %info.operation, "Service crashed: {}", info.error);
        PromptChoice::Dismiss
    }
}

#[derive(Debug, Serialize)]
struct CrashReport<'a> {
    error: &'a str,
    operation: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_document: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_tail: Option<String>,
    os: &'static str,
    arch: &'static str,
    client_version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_version: Option<&'a str>,
    timestamp: String,
}

/// Bundles crash context and ships it to the configured endpoint.
#[derive(Clone)]
pub struct CrashReporter {
    prompt: Arc<dyn CrashPrompt>,
    endpoint: Option<String>,
    log_dir: Option<PathBuf>,
    http: reqwest::Client,
}

impl CrashReporter {
    #[must_use]
    pub fn new(
        prompt: Arc<dyn CrashPrompt>,
        endpoint: Option<String>,
        log_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            prompt,
            endpoint,
            log_dir,
            http: reqwest::Client::new(),
        }
    }

    /// Run one crash through the prompt and, if asked, submission. Failures
    /// are logged, never returned.
    pub async fn handle_crash(&self, info: CrashInfo, service_version: Option<String>) {
        match self.prompt.choose(&info) {
            PromptChoice::Dismiss => debug!("Crash dialog dismissed"),
            PromptChoice::OpenLogs => match &self.log_dir {
                Some(dir) => info!("Service logs are in {}", dir.display()),
                None => info!("No service log directory configured"),
            },
            PromptChoice::SendReport => self.submit(&info, service_version.as_deref()).await,
        }
    }

    async fn submit(&self, info: &CrashInfo, service_version: Option<&str>) {
        let Some(endpoint) = &self.endpoint else {
            warn!("Crash report requested but no endpoint is configured");
            return;
        };
        let report = CrashReport {
            error: &info.error,
            operation: &info.operation,
            active_document: info.active_document.as_deref(),
            log_tail: self.log_dir.as_deref().and_then(newest_log_tail),
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            client_version: env!("CARGO_PKG_VERSION"),
            service_version,
            timestamp: Utc::now().to_rfc3339(),
        };
        match self.http.post(endpoint).json(&report).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Crash report delivered");
            }
            Ok(response) => warn!("Crash endpoint answered {}", response.status()),
            Err(e) => warn!("Failed to deliver crash report: {e}"),
        }
    }
}

/// Last [`LOG_TAIL_LINES`] lines of the most recently modified `.log` file
/// under `dir`. `None` when the directory has no readable log.
fn newest_log_tail(dir: &Path) -> Option<String> {
    let entries = fs::read_dir(dir).ok()?;
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.extension().is_some_and(|ext| ext == "log") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if newest.as_ref().is_none_or(|(stamp, _)| modified > *stamp) {
            newest = Some((modified, path));
        }
    }
    let (_, path) = newest?;
    let text = fs::read_to_string(&path).ok()?;
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    Some(lines[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Scripted(PromptChoice);

    impl CrashPrompt for Scripted {
        fn choose(&self, _info: &CrashInfo) -> PromptChoice {
            self.0
        }
    }

    fn crash() -> CrashInfo {
        CrashInfo::new("start", "interpreter exploded").with_active_document("/srv/models.py")
    }

    #[test]
    fn tail_takes_last_lines_of_newest_log() {
        let dir = tempfile::tempdir().unwrap();

        let stale = dir.path().join("service-old.log");
        fs::write(&stale, "stale line\n").unwrap();
        let file = fs::File::options().write(true).open(&stale).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(120))
            .unwrap();

        let fresh = dir.path().join("service-new.log");
        let body: String = (1..=150).map(|n| format!("line {n}\n")).collect();
        fs::write(&fresh, body).unwrap();

        let tail = newest_log_tail(dir.path()).unwrap();
        let lines: Vec<&str> = tail.lines().collect();
        assert_eq!(lines.len(), 100);
        assert_eq!(lines[0], "line 51");
        assert_eq!(lines[99], "line 150");
    }

    #[test]
    fn tail_ignores_non_log_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "not a log\n").unwrap();
        assert_eq!(newest_log_tail(dir.path()), None);
    }

    #[tokio::test]
    async fn test_report_carries_context_to_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crash"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("service.log"), "traceback line\n").unwrap();

        let reporter = CrashReporter::new(
            Arc::new(Scripted(PromptChoice::SendReport)),
            Some(format!("{}/crash", server.uri())),
            Some(dir.path().to_path_buf()),
        );
        reporter.handle_crash(crash(), Some("16.3.0".to_string())).await;

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["error"], "interpreter exploded");
        assert_eq!(body["operation"], "start");
        assert_eq!(body["active_document"], "/srv/models.py");
        assert_eq!(body["service_version"], "16.3.0");
        assert_eq!(body["client_version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["log_tail"], "traceback line");
        assert!(body["os"].as_str().is_some_and(|os| !os.is_empty()));
        assert!(body["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_server_error_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let reporter = CrashReporter::new(
            Arc::new(Scripted(PromptChoice::SendReport)),
            Some(server.uri()),
            None,
        );
        // Must complete without panicking or surfacing the 500.
        reporter.handle_crash(crash(), None).await;
    }

    #[tokio::test]
    async fn dismissed_crash_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let reporter = CrashReporter::new(
            Arc::new(Scripted(PromptChoice::Dismiss)),
            Some(server.uri()),
            None,
        );
        reporter.handle_crash(crash(), None).await;
    }

    #[tokio::test]
    async fn send_without_endpoint_is_a_noop() {
        let reporter =
            CrashReporter::new(Arc::new(Scripted(PromptChoice::SendReport)), None, None);
        reporter.handle_crash(crash(), None).await;
    }
}
