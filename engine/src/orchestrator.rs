//! The lifecycle controller.
//!
//! One task owns everything that moves: the profile store, the environment
//! resolver, the service handle, and the state machine itself. The host
//! drives it through [`OrchestratorHandle`] events; the running service
//! talks back through [`ServiceEvent`]s. Both funnel into [`Orchestrator::run`],
//! which applies them strictly one at a time, so no state is ever touched
//! from two places.
//!
//! Holding the [`ServiceClient`] handle is what "a session exists" means.
//! A stop takes the handle out and runs the shutdown handshake on a spawned
//! task; until that task reports back, the transition gate parks any new
//! transition request (latest wins) and the controller reconciles against
//! the freshly persisted store state once the stop lands.

use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use capstan_config::{ConfigStore, HostConfig, TransportMode};
use capstan_core::{EnvironmentResolver, TemplateVars};
use capstan_service::{ExitReason, LaunchSpec, ServiceClient, ServiceEvent, Transport};
use capstan_types::{
    ChangeImpact, ConfigurationProfile, CrashInfo, LifecycleState, LoadingState, ProfileId,
    Selection, StatusUpdate, classify_fields,
};

use crate::diagnostics::CrashReporter;
use crate::events::{ControlEvent, EngineEvent, OrchestratorHandle};
use crate::gate::{DeferredTransition, TransitionGate};

const CONTROL_CHANNEL_CAPACITY: usize = 256;
const SERVICE_CHANNEL_CAPACITY: usize = 64;

/// What the controller does once an in-flight stop completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterStop {
    /// Come to rest in this state.
    Settle(LifecycleState),
    /// Chain into a start of this profile (restart or profile switch).
    Start(ProfileId),
}

/// Why a start attempt did not produce a session.
#[derive(Debug, thiserror::Error)]
enum StartError {
    #[error("profile {0} no longer exists")]
    UnknownProfile(ProfileId),
    #[error("interpreter {path:?} rejected: {reason}")]
    Interpreter { path: String, reason: String },
    #[error("project path {0:?} does not lead to a project root")]
    Project(String),
    #[error(transparent)]
    Template(#[from] capstan_core::TemplateError),
    #[error("service failed to start: {0:#}")]
    Spawn(anyhow::Error),
}

pub struct Orchestrator {
    store: ConfigStore,
    host: HostConfig,
    resolver: EnvironmentResolver,
    reporter: CrashReporter,
    workspace_root: PathBuf,
    log_dir: Option<PathBuf>,

    state: LifecycleState,
    /// Live session handle. `Some` is the definition of "a session exists".
    client: Option<ServiceClient>,
    /// Profile the current session was started from.
    active: Option<ProfileId>,
    /// Interpreter announced by the surrounding environment, used by
    /// profiles that do not pin their own. Never persisted.
    ambient_interpreter: Option<String>,
    gate: TransitionGate,
    after_stop: AfterStop,
    shutting_down: bool,

    control_tx: mpsc::Sender<EngineEvent>,
    control_rx: mpsc::Receiver<EngineEvent>,
    /// Event stream of the live session. Created per start and dropped with
    /// the handle, so a torn-down session can never speak for its successor.
    service_rx: Option<mpsc::Receiver<ServiceEvent>>,
    status_tx: watch::Sender<StatusUpdate>,
}

impl Orchestrator {
    /// Build a controller around an opened store. Returns the controller
    /// itself (to be consumed by [`Orchestrator::run`]), the handle the host
    /// drives it with, and the status watch the host renders from.
    #[must_use]
    pub fn new(
        store: ConfigStore,
        host: HostConfig,
        resolver: EnvironmentResolver,
        reporter: CrashReporter,
        workspace_root: PathBuf,
        log_dir: Option<PathBuf>,
    ) -> (Self, OrchestratorHandle, watch::Receiver<StatusUpdate>) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (status_tx, status_rx) =
            watch::channel(StatusUpdate::for_state(LifecycleState::Idle, None));
        let handle = OrchestratorHandle::new(control_tx.clone());
        let orchestrator = Self {
            store,
            host,
            resolver,
            reporter,
            workspace_root,
            log_dir,
            state: LifecycleState::Idle,
            client: None,
            active: None,
            ambient_interpreter: None,
            gate: TransitionGate::new(),
            after_stop: AfterStop::Settle(LifecycleState::Idle),
            shutting_down: false,
            control_tx,
            control_rx,
            service_rx: None,
            status_tx,
        };
        (orchestrator, handle, status_rx)
    }

    /// Consume the controller and process events until shutdown.
    ///
    /// A persisted profile selection is applied first, so a workspace that
    /// had a session running gets it back without user input.
    pub async fn run(mut self) {
        if let Selection::Profile(_) = self.store.selection() {
            self.reconcile().await;
        }
        loop {
            tokio::select! {
                Some(event) = self.control_rx.recv() => {
                    if self.handle_event(event).await {
                        break;
                    }
                }
                Some(event) = recv_service(&mut self.service_rx) => {
                    self.handle_service_event(event).await;
                }
                else => break,
            }
        }
        info!("Orchestrator loop exited");
    }

    /// Returns true when the loop should exit.
    async fn handle_event(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::Control(event) => self.handle_control(event).await,
            EngineEvent::StopComplete => {
                self.handle_stop_complete().await;
                self.shutting_down
            }
        }
    }

    async fn handle_control(&mut self, event: ControlEvent) -> bool {
        match event {
            ControlEvent::Select(selection) => {
                self.handle_select(selection).await;
                false
            }
            ControlEvent::SaveProfile(profile) => {
                self.handle_save(profile).await;
                false
            }
            ControlEvent::DeleteProfile(id) => {
                self.handle_delete(id).await;
                false
            }
            ControlEvent::AddProfile { reply } => {
                let _ = reply.send(self.store.add_profile().map_err(Into::into));
                false
            }
            ControlEvent::InterpreterChanged(path) => {
                self.handle_interpreter_changed(path).await;
                false
            }
            ControlEvent::Shutdown => self.handle_shutdown().await,
        }
    }

    // ── Control events ─────────────────────────────────────────────────

    async fn handle_select(&mut self, selection: Selection) {
        if let Err(e) = self.store.select(selection) {
            warn!("Rejected selection {selection}: {e}");
            return;
        }
        if !self.gate.is_accepting() {
            self.gate.defer(DeferredTransition::Selection);
            return;
        }
        self.apply_selection(selection).await;
    }

    /// Drive the machine toward `selection`. The gate must be open.
    async fn apply_selection(&mut self, selection: Selection) {
        match selection {
            Selection::Disabled => {
                if self.client.is_some() {
                    self.begin_stop(AfterStop::Settle(LifecycleState::Disabled));
                } else {
                    self.settle(LifecycleState::Disabled);
                }
            }
            Selection::Profile(id) => {
                if self.active == Some(id)
                    && matches!(
                        self.state,
                        LifecycleState::Starting | LifecycleState::Running
                    )
                {
                    debug!(%id, "Profile already active, nothing to do");
                    return;
                }
                if self.client.is_some() {
                    self.begin_stop(AfterStop::Start(id));
                } else {
                    let fallback = self.state;
                    self.start_session(id, fallback).await;
                }
            }
        }
    }

    async fn handle_save(&mut self, mut profile: ConfigurationProfile) {
        self.resolve_profile_fields(&mut profile);
        let id = profile.id;
        let fields = match self.store.save(profile) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(%id, "Failed to save profile: {e}");
                return;
            }
        };
        if fields.is_empty() {
            trace!(%id, "Edit changes nothing the service observes");
            return;
        }
        if !self.gate.is_accepting() {
            self.gate.defer(DeferredTransition::ProfileEdit);
            return;
        }
        if self.active != Some(id) || self.client.is_none() {
            // The next start reads the store fresh; edits to a profile that
            // is not live need no push.
            debug!(%id, "Edit on inactive profile recorded");
            return;
        }
        match classify_fields(&fields) {
            ChangeImpact::RestartRequired => {
                info!(%id, "Interpreter changed, restarting the session");
                self.begin_stop(AfterStop::Start(id));
            }
            ChangeImpact::LiveUpdate => self.push_configuration(id).await,
            ChangeImpact::NoOp => {}
        }
    }

    /// Send the current shape of profile `id` to the running service.
    async fn push_configuration(&mut self, id: ProfileId) {
        let Some(profile) = self.store.profile(id).cloned() else {
            return;
        };
        let Some(client) = &self.client else {
            return;
        };
        if let Err(e) = client.notify_configuration_changed(&profile).await {
            // Racing a stop is the usual cause; the next start reads the
            // store anyway.
            trace!("Configuration push not delivered: {e}");
        }
    }

    /// Recompute the cached project fields before an edit is persisted.
    fn resolve_profile_fields(&self, profile: &mut ConfigurationProfile) {
        let vars = TemplateVars::for_workspace(&self.workspace_root);
        match self.resolver.resolve_project(&profile.project_path, &vars) {
            Ok(Some(resolved)) => {
                profile.resolved_project_path = Some(resolved.root);
                profile.resolved_version = Some(resolved.version);
            }
            Ok(None) => {
                profile.resolved_project_path = None;
                profile.resolved_version = None;
            }
            Err(e) => {
                warn!(id = %profile.id, "Project path template rejected: {e}");
                profile.resolved_project_path = None;
                profile.resolved_version = None;
            }
        }
        for aux in &profile.auxiliary_paths {
            match self.resolver.resolve_auxiliary_path(aux, &vars) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(id = %profile.id, path = %aux, "Auxiliary path holds no service modules");
                }
                Err(e) => warn!(id = %profile.id, "Auxiliary path template rejected: {e}"),
            }
        }
    }

    async fn handle_delete(&mut self, id: ProfileId) {
        let cleared = match self.store.delete(id) {
            Ok(cleared) => cleared,
            Err(e) => {
                warn!(%id, "Failed to delete profile: {e}");
                return;
            }
        };
        if !cleared {
            // Deleted profile was not selected; the lifecycle is untouched.
            return;
        }
        if !self.gate.is_accepting() {
            self.gate.defer(DeferredTransition::ProfileDelete);
            return;
        }
        if self.client.is_some() && self.active == Some(id) {
            self.begin_stop(AfterStop::Settle(LifecycleState::Disabled));
        } else {
            self.settle(LifecycleState::Disabled);
        }
    }

    async fn handle_interpreter_changed(&mut self, path: String) {
        info!("Ambient interpreter is now {path:?}");
        self.ambient_interpreter = Some(path);
        if !self.gate.is_accepting() {
            self.gate.defer(DeferredTransition::InterpreterChange);
            return;
        }
        let follows_ambient = self
            .active
            .and_then(|id| self.store.profile(id))
            .is_some_and(ConfigurationProfile::uses_ambient_interpreter);
        if self.client.is_some()
            && follows_ambient
            && let Some(id) = self.active
        {
            info!("Active profile follows the ambient interpreter, restarting");
            self.begin_stop(AfterStop::Start(id));
        }
    }

    /// Returns true when the loop should exit now; false when an in-flight
    /// stop has to land first.
    async fn handle_shutdown(&mut self) -> bool {
        info!("Shutting down");
        self.shutting_down = true;
        if self.state.is_stopping() {
            return false;
        }
        if let Some(client) = self.client.take() {
            self.service_rx = None;
            client.stop(self.host.stop_timeout()).await;
        }
        self.settle(LifecycleState::Idle);
        true
    }

    // ── Stop choreography ──────────────────────────────────────────────

    /// Take the session handle, close the gate, and run the shutdown
    /// handshake off the loop task. Completion comes back as
    /// [`EngineEvent::StopComplete`].
    fn begin_stop(&mut self, next: AfterStop) {
        debug_assert!(self.client.is_some(), "begin_stop without a session");
        let Some(client) = self.client.take() else {
            return;
        };
        self.service_rx = None;
        self.after_stop = next;
        self.gate.close();
        self.set_state(LifecycleState::Stopping);
        let grace = self.host.stop_timeout();
        let control_tx = self.control_tx.clone();
        tokio::spawn(async move {
            client.stop(grace).await;
            let _ = control_tx.send(EngineEvent::StopComplete).await;
        });
    }

    async fn handle_stop_complete(&mut self) {
        self.active = None;
        let deferred = self.gate.reopen();
        if self.shutting_down {
            if let Some(kind) = deferred {
                debug!("Discarding deferred {kind} at shutdown");
            }
            self.settle(LifecycleState::Idle);
            return;
        }
        if let Some(kind) = deferred {
            debug!("Replaying deferred {kind} against the stored selection");
            self.reconcile().await;
            return;
        }
        match self.after_stop {
            AfterStop::Start(id) => {
                self.state = LifecycleState::Idle;
                self.start_session(id, LifecycleState::Idle).await;
            }
            AfterStop::Settle(state) => self.settle(state),
        }
        self.after_stop = AfterStop::Settle(LifecycleState::Idle);
    }

    /// Make the machine match the persisted selection, reading everything
    /// fresh. Used at startup and when replaying a deferred transition.
    async fn reconcile(&mut self) {
        match self.store.selection() {
            Selection::Profile(id) if self.store.profile(id).is_some() => {
                if self.active == Some(id)
                    && matches!(
                        self.state,
                        LifecycleState::Starting | LifecycleState::Running
                    )
                {
                    return;
                }
                if self.client.is_some() {
                    self.begin_stop(AfterStop::Start(id));
                } else {
                    self.start_session(id, LifecycleState::Idle).await;
                }
            }
            Selection::Profile(id) => {
                warn!(%id, "Selection points at a missing profile");
                self.settle(LifecycleState::Idle);
            }
            Selection::Disabled => {
                if self.client.is_some() {
                    self.begin_stop(AfterStop::Settle(LifecycleState::Disabled));
                } else {
                    self.settle(LifecycleState::Disabled);
                }
            }
        }
    }

    // ── Start choreography ─────────────────────────────────────────────

    /// Validate and start a session for `id`. On a validation failure the
    /// machine rests in `fallback`; on a spawn failure it rests in idle.
    async fn start_session(&mut self, id: ProfileId, fallback: LifecycleState) {
        match self.try_start(id).await {
            Ok(()) => {}
            Err(e @ StartError::Spawn(_)) => {
                warn!("{e}");
                self.settle(LifecycleState::Idle);
            }
            Err(e) => {
                warn!("Start rejected: {e}");
                self.settle(fallback);
            }
        }
    }

    async fn try_start(&mut self, id: ProfileId) -> Result<(), StartError> {
        debug_assert!(self.client.is_none(), "second session while one is live");
        let Some(profile) = self.store.profile(id).cloned() else {
            return Err(StartError::UnknownProfile(id));
        };

        let interpreter = profile.effective_interpreter(self.ambient_interpreter.as_deref());
        let probe = self.resolver.resolve_interpreter(&interpreter).await;
        if !probe.valid {
            return Err(StartError::Interpreter {
                path: interpreter,
                reason: probe
                    .reason
                    .unwrap_or_else(|| "interpreter probe failed".to_string()),
            });
        }

        let vars = TemplateVars::for_workspace(&self.workspace_root);
        let Some(resolved) = self.resolver.resolve_project(&profile.project_path, &vars)? else {
            return Err(StartError::Project(profile.project_path.clone()));
        };
        debug!(
            root = %resolved.root.display(),
            version = %resolved.version,
            "Project resolved"
        );

        let mut spec = LaunchSpec::new(interpreter, self.host.service_module.clone())
            .with_args(self.host.service_args.clone())
            .with_transport(match self.host.transport {
                TransportMode::Stdio => Transport::Stdio,
                TransportMode::Tcp => Transport::Tcp {
                    port: self.host.tcp_port,
                },
            });
        if let Some(dir) = &self.log_dir {
            spec = spec.with_log_file(dir.join(session_log_name()));
        }

        let (service_tx, service_rx) = mpsc::channel(SERVICE_CHANNEL_CAPACITY);
        let client = ServiceClient::start(&spec, service_tx)
            .await
            .map_err(StartError::Spawn)?;
        if let Err(e) = client.notify_ready().await {
            trace!("Ready notification not delivered: {e}");
        }
        self.service_rx = Some(service_rx);
        self.client = Some(client);
        self.active = Some(id);
        self.set_state(LifecycleState::Starting);
        info!(%id, name = %profile.name, "Session starting");
        Ok(())
    }

    // ── Service events ─────────────────────────────────────────────────

    async fn handle_service_event(&mut self, event: ServiceEvent) {
        match event {
            ServiceEvent::LoadingStateChanged(loading) => self.handle_loading_update(loading),
            ServiceEvent::ConfigurationRequested { request_id } => {
                let profile = self.active.and_then(|id| self.store.profile(id)).cloned();
                let Some(client) = &self.client else {
                    trace!("Configuration request with no session");
                    return;
                };
                if let Err(e) = client.respond_configuration(request_id, profile.as_ref()).await {
                    trace!("Configuration response not delivered: {e}");
                }
            }
            ServiceEvent::Crashed(info) => self.handle_crash(info).await,
            ServiceEvent::Exited(reason) => self.handle_exit(reason),
        }
    }

    fn handle_loading_update(&mut self, loading: LoadingState) {
        match (self.state, loading) {
            (LifecycleState::Starting, LoadingState::Stopped) => {
                info!("Service finished loading");
                self.set_state(LifecycleState::Running);
            }
            // Loading during startup is already what the status shows.
            (LifecycleState::Starting, LoadingState::Started) => {}
            (LifecycleState::Running, _) => {
                // Reindexing inside a running session only toggles the
                // spinner; the state does not move.
                let label = self
                    .active
                    .and_then(|id| self.store.profile(id))
                    .map(ConfigurationProfile::status_label);
                let _ = self.status_tx.send(StatusUpdate {
                    label: label.unwrap_or_else(|| "service".to_string()),
                    loading: loading == LoadingState::Started,
                });
            }
            _ => trace!("Loading update while {}", self.state),
        }
    }

    async fn handle_crash(&mut self, info: CrashInfo) {
        warn!(operation = %info.operation, "Service reported a crash: {}", info.error);
        self.report(info);
        if self.client.is_some() {
            self.begin_stop(AfterStop::Settle(LifecycleState::Idle));
        } else {
            self.settle(LifecycleState::Idle);
        }
    }

    fn handle_exit(&mut self, reason: ExitReason) {
        if self.state.is_stopping() {
            trace!("Service stream closed during stop");
            return;
        }
        if self.client.take().is_none() {
            trace!("Stale exit event");
            return;
        }
        self.service_rx = None;
        warn!("Service exited unexpectedly: {reason}");
        self.report(CrashInfo::new(
            "session",
            format!("service exited unexpectedly: {reason}"),
        ));
        self.settle(LifecycleState::Idle);
    }

    /// Hand a crash to the reporter without blocking the loop.
    fn report(&self, info: CrashInfo) {
        let service_version = self
            .active
            .and_then(|id| self.store.profile(id))
            .and_then(|profile| profile.resolved_version.clone());
        let reporter = self.reporter.clone();
        tokio::spawn(async move {
            reporter.handle_crash(info, service_version).await;
        });
    }

    // ── State bookkeeping ──────────────────────────────────────────────

    /// Drop the active profile association and publish a resting state.
    fn settle(&mut self, state: LifecycleState) {
        self.active = None;
        self.set_state(state);
    }

    fn set_state(&mut self, state: LifecycleState) {
        if self.state != state {
            debug!("Lifecycle {} -> {state}", self.state);
        }
        self.state = state;
        self.publish_status();
    }

    fn publish_status(&self) {
        let label = self
            .active
            .and_then(|id| self.store.profile(id))
            .map(ConfigurationProfile::status_label);
        let _ = self
            .status_tx
            .send(StatusUpdate::for_state(self.state, label.as_deref()));
    }
}

/// Receive from the live session's event stream, or park forever when no
/// session exists.
async fn recv_service(rx: &mut Option<mpsc::Receiver<ServiceEvent>>) -> Option<ServiceEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn session_log_name() -> String {
    format!("service-{}.log", Utc::now().format("%Y%m%d-%H%M%S"))
}
