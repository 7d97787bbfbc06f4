//! Events feeding the orchestrator loop, and the handle that sends them.

use anyhow::{Context, Result, anyhow};
use capstan_types::{ConfigurationProfile, ProfileId, Selection};
use tokio::sync::{mpsc, oneshot};

/// Everything the orchestrator loop consumes from its control channel.
#[derive(Debug)]
pub(crate) enum EngineEvent {
    Control(ControlEvent),
    /// The spawned stop task finished tearing the session down.
    StopComplete,
}

/// Requests from the host surface.
#[derive(Debug)]
pub(crate) enum ControlEvent {
    Select(Selection),
    SaveProfile(ConfigurationProfile),
    DeleteProfile(ProfileId),
    AddProfile {
        reply: oneshot::Sender<Result<ConfigurationProfile>>,
    },
    InterpreterChanged(String),
    Shutdown,
}

/// Cloneable entry point into the orchestrator loop.
///
/// Every method queues an event; the loop applies them strictly in arrival
/// order. Methods fail only when the loop itself has exited.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<EngineEvent>,
}

impl OrchestratorHandle {
    pub(crate) fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// Persist `selection` and move the lifecycle toward it.
    pub async fn select(&self, selection: Selection) -> Result<()> {
        self.send(ControlEvent::Select(selection)).await
    }

    /// Persist an edited profile and restart or notify the service as the
    /// change requires.
    pub async fn save_profile(&self, profile: ConfigurationProfile) -> Result<()> {
        self.send(ControlEvent::SaveProfile(profile)).await
    }

    /// Delete a profile; stops the session if the profile was active.
    pub async fn delete_profile(&self, id: ProfileId) -> Result<()> {
        self.send(ControlEvent::DeleteProfile(id)).await
    }

    /// Create a profile with the next free id and a placeholder name.
    pub async fn add_profile(&self) -> Result<ConfigurationProfile> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlEvent::AddProfile { reply }).await?;
        rx.await.context("orchestrator dropped the add-profile reply")?
    }

    /// Announce a new ambient interpreter path.
    pub async fn interpreter_changed(&self, path: impl Into<String>) -> Result<()> {
        self.send(ControlEvent::InterpreterChanged(path.into())).await
    }

    /// Stop any running session and exit the loop. Never deferred.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(ControlEvent::Shutdown).await
    }

    async fn send(&self, event: ControlEvent) -> Result<()> {
        self.tx
            .send(EngineEvent::Control(event))
            .await
            .map_err(|_| anyhow!("orchestrator loop has exited"))
    }
}
