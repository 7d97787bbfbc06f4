//! Service client — owns one session and turns wire traffic into events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::process::Child;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::timeout;

use capstan_types::{ConfigurationProfile, ServiceStatus};

use crate::codec::{FrameReader, FrameWriter};
use crate::protocol::{self, IncomingMessage, Notification, Request};
use crate::transport::{self, ServiceIo};
use crate::types::{ExitReason, LaunchSpec, ServiceEvent};

const WRITER_CHANNEL_CAPACITY: usize = 64;

enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

/// Handle to one running service session.
///
/// Holding a `ServiceClient` is proof the transport came up; there is no
/// separate connected flag. Dropping the handle kills a spawned child via
/// `kill_on_drop`, so prefer an orderly [`stop`](Self::stop).
pub struct ServiceClient {
    child: Option<Child>,
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: u64,
    pending: PendingMap,
    reader_handle: tokio::task::JoinHandle<()>,
    #[allow(dead_code)]
    writer_handle: tokio::task::JoinHandle<()>,
}

impl ServiceClient {
    /// Bring up the transport and start the reader and writer tasks.
    ///
    /// Service traffic arrives on `event_tx` from here on, including the
    /// final [`ServiceEvent::Exited`] when the wire goes away.
    pub async fn start(spec: &LaunchSpec, event_tx: mpsc::Sender<ServiceEvent>) -> Result<Self> {
        let ServiceIo {
            reader,
            writer,
            child,
        } = transport::establish(spec).await?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(async move {
            let mut frames = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = frames.write_frame(&frame).await {
                            tracing::warn!("service write error: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_writer_tx = writer_tx.clone();
        let reader_handle = tokio::spawn(async move {
            let mut frames = FrameReader::new(reader);
            loop {
                match frames.read_frame().await {
                    Ok(Some(frame)) => {
                        Self::dispatch_frame(&frame, &reader_pending, &event_tx, &reader_writer_tx)
                            .await;
                    }
                    Ok(None) => {
                        tracing::info!("service closed its stream");
                        let _ = event_tx.send(ServiceEvent::Exited(ExitReason::Closed)).await;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("service reader error: {e}");
                        let _ = event_tx
                            .send(ServiceEvent::Exited(ExitReason::Failed(e.to_string())))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(Self {
            child,
            writer_tx,
            next_id: 1,
            pending,
            reader_handle,
            writer_handle,
        })
    }

    async fn dispatch_frame(
        frame: &serde_json::Value,
        pending: &Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>,
        event_tx: &mpsc::Sender<ServiceEvent>,
        writer_tx: &mpsc::Sender<WriterCommand>,
    ) {
        let Some(incoming) = protocol::parse_incoming(frame) else {
            tracing::trace!("ignoring malformed frame from service");
            return;
        };

        match incoming {
            IncomingMessage::Response { id, body } => {
                let sender = pending.lock().await.remove(&id);
                if let Some(tx) = sender {
                    let _ = tx.send(body);
                }
            }
            IncomingMessage::Request { id, method } => {
                if method == protocol::GET_CONFIGURATION {
                    let _ = event_tx
                        .send(ServiceEvent::ConfigurationRequested { request_id: id })
                        .await;
                } else {
                    tracing::debug!("service sent request {method}, replying method not found");
                    let reply = protocol::method_not_found(&id, &method);
                    let _ = writer_tx.send(WriterCommand::Send(reply)).await;
                }
            }
            IncomingMessage::Notification { method, params } => match method.as_str() {
                protocol::LOADING_STATUS_UPDATE => {
                    match protocol::loading_state(params.as_ref()) {
                        Some(state) => {
                            let _ = event_tx.send(ServiceEvent::LoadingStateChanged(state)).await;
                        }
                        None => {
                            tracing::debug!("loading status update with unknown phase: {params:?}");
                        }
                    }
                }
                protocol::DISPLAY_CRASH_NOTIFICATION => match protocol::crash_info(params) {
                    Some(info) => {
                        let _ = event_tx.send(ServiceEvent::Crashed(info)).await;
                    }
                    None => tracing::debug!("crash notification with unreadable payload"),
                },
                other => tracing::trace!("ignoring service notification {other}"),
            },
        }
    }

    /// Logical status of the handle. A constructed client is `Running`
    /// until its wire goes away; `Stopping` and the terminal `Stopped` are
    /// observed through [`stop`](Self::stop) consuming the handle.
    pub fn status(&mut self) -> ServiceStatus {
        let alive = if let Some(child) = &mut self.child {
            matches!(child.try_wait(), Ok(None))
        } else {
            !self.reader_handle.is_finished()
        };
        if alive {
            ServiceStatus::Running
        } else {
            ServiceStatus::Stopped
        }
    }

    /// Whether the session still looks alive: a spawned child that has not
    /// exited, or (for a connected service) a reader task still on the wire.
    pub fn is_running(&mut self) -> bool {
        self.status() == ServiceStatus::Running
    }

    /// Tell the service the session is wired up and traffic may flow.
    pub async fn notify_ready(&self) -> Result<()> {
        self.send_notification(protocol::CLIENT_READY, None).await
    }

    /// Forward updated settings for a change the service can absorb without
    /// a restart.
    pub async fn notify_configuration_changed(&self, profile: &ConfigurationProfile) -> Result<()> {
        let params = protocol::settings_value(Some(profile));
        self.send_notification(protocol::CONFIGURATION_CHANGED, Some(params))
            .await
    }

    /// Answer a [`ServiceEvent::ConfigurationRequested`] with the active
    /// profile, or a null settings object when nothing is active.
    pub async fn respond_configuration(
        &self,
        request_id: serde_json::Value,
        profile: Option<&ConfigurationProfile>,
    ) -> Result<()> {
        let reply = protocol::response(&request_id, protocol::settings_value(profile));
        self.writer_tx
            .send(WriterCommand::Send(reply))
            .await
            .map_err(|_| anyhow::anyhow!("writer channel closed"))?;
        Ok(())
    }

    async fn send_request(
        &mut self,
        method: &'static str,
        params: Option<serde_json::Value>,
        wait: Duration,
    ) -> Result<serde_json::Value> {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = Request::new(id, method, params);
        let frame = serde_json::to_value(&request).context("serializing request")?;
        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            // Failed to enqueue; drop the pending entry so the map can't
            // accumulate dead senders.
            self.pending.lock().await.remove(&id);
            bail!("writer channel closed");
        }

        match timeout(wait, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                bail!("response channel dropped");
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                bail!("{method} request timed out after {}ms", wait.as_millis());
            }
        }
    }

    async fn send_notification(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        let notification = Notification::new(method, params);
        let frame = serde_json::to_value(&notification).context("serializing notification")?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| anyhow::anyhow!("writer channel closed"))?;
        Ok(())
    }

    /// Orderly teardown. Consumes the session.
    ///
    /// Sends the `shutdown` request, follows a clean answer with the `exit`
    /// notification, then gives a spawned child `grace` to leave before
    /// killing it. Every step is best-effort; the session is gone when this
    /// returns no matter what the service did.
    pub async fn stop(mut self, grace: Duration) {
        if let Ok(response) = self.send_request(protocol::SHUTDOWN, None, grace).await
            && response.get("error").is_none()
        {
            let _ = self.send_notification(protocol::EXIT, None).await;
        }

        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;

        if let Some(mut child) = self.child.take() {
            if timeout(grace, child.wait()).await.is_err() {
                tracing::debug!("service did not exit within {}ms, killing", grace.as_millis());
                let _ = child.kill().await;
            }
        }
    }
}
