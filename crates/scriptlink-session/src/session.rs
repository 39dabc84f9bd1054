use chrono::{DateTime, Utc};
use scriptlink_core::wire::reply_id_hint;
use scriptlink_core::{
    Command, Dialect, DriverConfig, DriverError, EvalMode, InboundFrame, ReplyFrame,
};
use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::correlator::Correlator;
use crate::transport::TransportLink;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Replied,
    Failed { kind: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandAudit {
    pub session_id: String,
    pub id: u64,
    pub await_async: bool,
    pub issued_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
    pub outcome: AuditOutcome,
}

/// Cheap to clone; all clones share one receive loop and correlator. Dropping
/// the last clone ends the session the same way `close()` does.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: String,
    peer: String,
    config: DriverConfig,
    correlator: Correlator,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    shutdown: watch::Sender<bool>,
    frames: broadcast::Sender<InboundFrame>,
    audit: Option<mpsc::Sender<CommandAudit>>,
}

impl Session {
    pub fn start(link: TransportLink, config: DriverConfig) -> Self {
        Self::start_with_audit(link, config, None)
    }

    pub fn start_with_audit(
        link: TransportLink,
        config: DriverConfig,
        audit: Option<mpsc::Sender<CommandAudit>>,
    ) -> Self {
        let TransportLink {
            peer,
            outbound,
            inbound,
        } = link;
        let (shutdown, _) = watch::channel(false);
        let (frames, _) = broadcast::channel(config.event_capacity.max(1));
        let inner = Arc::new(SessionInner {
            id: Uuid::new_v4().to_string(),
            peer,
            config,
            correlator: Correlator::new(),
            outbound: Mutex::new(Some(outbound)),
            shutdown,
            frames,
            audit,
        });
        info!(
            event = "session_start",
            session_id = %inner.id,
            peer = %inner.peer,
            dialect = %inner.config.dialect
        );
        let shutdown_rx = inner.shutdown.subscribe();
        tokio::spawn(receive_loop(Arc::downgrade(&inner), inbound, shutdown_rx));
        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.config.dialect
    }

    pub fn is_alive(&self) -> bool {
        !*self.inner.shutdown.borrow()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    pub async fn closed(&self) {
        let mut shutdown = self.shutdown_signal();
        let _ = shutdown.wait_for(|closed| *closed).await;
    }

    pub fn in_flight(&self) -> usize {
        self.inner.correlator.in_flight()
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<InboundFrame> {
        self.inner.frames.subscribe()
    }

    pub fn on_frame<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(InboundFrame) + Send + 'static,
    {
        let mut frames = self.subscribe_frames();
        let mut shutdown = self.shutdown_signal();
        let session_id = self.inner.id.clone();
        tokio::spawn(async move {
            if *shutdown.borrow() {
                return;
            }
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    frame = frames.recv() => match frame {
                        Ok(frame) => callback(frame),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(
                                event = "session_frames_lagged",
                                session_id = %session_id,
                                skipped
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    pub async fn send(&self, frame: String) -> Result<(), DriverError> {
        self.inner.send_raw(frame).await
    }

    pub async fn submit(
        &self,
        payload: impl Into<String>,
        mode: EvalMode,
    ) -> Result<ReplyFrame, DriverError> {
        let inner = &self.inner;
        if !self.is_alive() {
            return Err(DriverError::TransportClosed);
        }
        let command = inner.correlator.next_command(payload, mode);
        let frame = inner
            .config
            .dialect
            .encode_command(&command, inner.config.max_frame_bytes)?;
        let timeout = inner.config.timeout_for(mode);
        debug!(
            event = "command_submit",
            session_id = %inner.id,
            id = command.id,
            await_async = command.await_async,
            bytes = frame.len()
        );
        let result = inner
            .correlator
            .submit(&command, timeout, || inner.send_raw(frame))
            .await;
        inner.audit(&command, &result);
        result
    }

    pub fn close(&self) {
        self.inner.shutdown(DriverError::TransportClosed, "closed");
    }
}

impl SessionInner {
    async fn send_raw(&self, frame: String) -> Result<(), DriverError> {
        let sender = self
            .outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let Some(sender) = sender else {
            return Err(DriverError::TransportClosed);
        };
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            sent = sender.send(frame) => sent.map_err(|_| DriverError::TransportClosed),
            _ = shutdown.wait_for(|closed| *closed) => Err(DriverError::TransportClosed),
        }
    }

    fn dispatch(&self, text: &str) {
        match self
            .config
            .dialect
            .decode_inbound(text, self.config.max_frame_bytes)
        {
            Ok(InboundFrame::Reply(reply)) => {
                let id = reply.id;
                if !self.correlator.resolve(reply) {
                    debug!(event = "session_unknown_reply", session_id = %self.id, id);
                }
            }
            Ok(frame) => {
                let _ = self.frames.send(frame);
            }
            Err(err) => match reply_id_hint(text) {
                Some(id) if self.correlator.fail(id, DriverError::Decode(err.to_string())) => {
                    warn!(
                        event = "session_reply_undecodable",
                        session_id = %self.id,
                        id,
                        error = %err
                    );
                }
                id => {
                    warn!(
                        event = "session_frame_dropped",
                        session_id = %self.id,
                        ?id,
                        error = %err
                    );
                }
            },
        }
    }

    fn audit(&self, command: &Command, result: &Result<ReplyFrame, DriverError>) {
        let Some(audit) = &self.audit else {
            return;
        };
        let outcome = match result {
            Ok(_) => AuditOutcome::Replied,
            Err(err) => AuditOutcome::Failed {
                kind: err.kind(),
                message: err.to_string(),
            },
        };
        let record = CommandAudit {
            session_id: self.id.clone(),
            id: command.id,
            await_async: command.await_async,
            issued_at: command.issued_at,
            resolved_at: Utc::now(),
            outcome,
        };
        match audit.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(event = "command_audit_full", session_id = %self.id, id = command.id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(event = "command_audit_closed", session_id = %self.id, id = command.id);
            }
        }
    }

    fn shutdown(&self, reason: DriverError, cause: &'static str) {
        let was_closed = self.shutdown.send_replace(true);
        self.outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let failed = self.correlator.fail_all(reason);
        if !was_closed {
            info!(
                event = "session_end",
                session_id = %self.id,
                peer = %self.peer,
                cause,
                failed_pending = failed
            );
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.shutdown(DriverError::TransportClosed, "dropped");
    }
}

async fn receive_loop(
    inner: Weak<SessionInner>,
    mut inbound: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let cause = loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break None;
                }
            }
            frame = inbound.recv() => {
                let Some(text) = frame else {
                    break Some("transport_lost");
                };
                let Some(inner) = inner.upgrade() else {
                    break None;
                };
                inner.dispatch(&text);
            }
        }
    };
    if let (Some(cause), Some(inner)) = (cause, inner.upgrade()) {
        warn!(event = "session_transport_lost", session_id = %inner.id, peer = %inner.peer);
        inner.shutdown(DriverError::TransportClosed, cause);
    }
}
