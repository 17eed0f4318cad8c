pub mod config;
pub mod retry;

use crate::coordination::{
    ConnectRequest, CoordinationResult, CoordinationService, CreateMode, Session, SessionEvent,
    SessionId,
};
use crate::core::{CoordinationError, MasterError, Result};
use config::CoordinationConfig;
use log::{debug, error, info, warn};
use retry::RetryPolicy;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Connection status as seen by this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not started yet, or retries exhausted
    Disconnected,
    Connecting,
    Connected(SessionId),
    /// Link dropped, session may still be alive on the ensemble
    Suspended(SessionId),
    Closed,
}

/// Events fanned out to every group sharing the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinationEvent {
    /// A new session was established
    Connected { session: SessionId },
    /// The link of an existing session came back
    Reconnected { session: SessionId },
    /// The link dropped; the session may still be alive
    Suspended,
    /// The session expired; its ephemeral nodes are gone
    Lost,
    ChildrenChanged { path: String },
}

/// Managed connection to a coordination ensemble
///
/// Owns one session at a time, reconnects according to the configured
/// retry policy and publishes connection state changes and watch
/// notifications to all subscribers. Cheap to share behind an `Arc`.
pub struct CoordinationConnection {
    service: Arc<dyn CoordinationService>,
    config: CoordinationConfig,
    retry: Arc<dyn RetryPolicy>,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<CoordinationEvent>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CoordinationConnection {
    /// Create a new connection; nothing happens until `start()`
    pub fn new(service: Arc<dyn CoordinationService>, config: CoordinationConfig) -> Result<Self> {
        config.validate().map_err(MasterError::Configuration)?;

        let retry: Arc<dyn RetryPolicy> = Arc::from(config.retry.build());
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (events, _) = broadcast::channel(config.event_buffer);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            service,
            config,
            retry,
            status,
            events,
            shutdown,
            task: Mutex::new(None),
        })
    }

    /// Replace the reconnect policy built from the configuration
    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.status(), ConnectionStatus::Connected(_))
    }

    /// Current session id, if a session is established
    pub fn session_id(&self) -> Option<SessionId> {
        match self.status() {
            ConnectionStatus::Connected(id) | ConnectionStatus::Suspended(id) => Some(id),
            _ => None,
        }
    }

    /// Subscribe to connection and watch events
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.events.subscribe()
    }

    /// Start the connection
    ///
    /// Waits at most `connection_timeout` for the first session; if none is
    /// established by then, connecting continues in the background. Never
    /// fails because of connectivity.
    pub async fn start(&self) -> Result<()> {
        {
            let mut task = self.task.lock()?;
            if self.status() == ConnectionStatus::Closed {
                return Err(MasterError::Closed(self.config.describe()));
            }
            if task.is_none() {
                info!("Connecting to coordination service {}", self.config.describe());
                self.status.send_replace(ConnectionStatus::Connecting);
                let session_loop = SessionLoop {
                    service: self.service.clone(),
                    config: self.config.clone(),
                    retry: self.retry.clone(),
                    status: self.status.clone(),
                    events: self.events.clone(),
                    shutdown: self.shutdown.subscribe(),
                };
                *task = Some(tokio::spawn(session_loop.run()));
            }
        }

        let mut status = self.status.subscribe();
        let connected = tokio::time::timeout(
            self.config.connection_timeout,
            status.wait_for(|s| matches!(s, ConnectionStatus::Connected(_))),
        )
        .await
        .map(|seen| seen.is_ok())
        .unwrap_or(false);
        if !connected {
            warn!(
                "No session with {} after {:?}; still trying in the background",
                self.config.describe(),
                self.config.connection_timeout
            );
        }
        Ok(())
    }

    /// Close the session and stop reconnecting
    pub async fn close(&self) -> Result<()> {
        let task = self.task.lock()?.take();
        self.shutdown.send_replace(true);

        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!("Coordination session task ended abnormally: {}", err);
            }
        }
        let session = self.session_id();
        self.status.send_replace(ConnectionStatus::Closed);
        if let Some(session) = session {
            if let Err(err) = self.service.close_session(session).await {
                warn!("Failed to close coordination session {}: {}", session, err);
            }
        }
        info!("Closed coordination connection {}", self.config.describe());
        Ok(())
    }

    fn live_session(&self) -> CoordinationResult<SessionId> {
        match self.status() {
            ConnectionStatus::Connected(id) => Ok(id),
            _ => Err(CoordinationError::ConnectionLoss),
        }
    }

    pub async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> CoordinationResult<String> {
        let session = self.live_session()?;
        self.service.create(session, path, data, mode).await
    }

    /// Create a node owned by `session`; fails once that session is replaced
    pub async fn create_in(
        &self,
        session: SessionId,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> CoordinationResult<String> {
        if self.live_session()? != session {
            return Err(CoordinationError::SessionExpired(session));
        }
        self.service.create(session, path, data, mode).await
    }

    pub async fn ensure_path(&self, path: &str) -> CoordinationResult<()> {
        let session = self.live_session()?;
        self.service.ensure_path(session, path).await
    }

    pub async fn exists(&self, path: &str) -> CoordinationResult<bool> {
        let session = self.live_session()?;
        self.service.exists(session, path).await
    }

    pub async fn get_data(&self, path: &str) -> CoordinationResult<Vec<u8>> {
        let session = self.live_session()?;
        self.service.get_data(session, path).await
    }

    pub async fn set_data(&self, path: &str, data: Vec<u8>) -> CoordinationResult<()> {
        let session = self.live_session()?;
        self.service.set_data(session, path, data).await
    }

    pub async fn delete(&self, path: &str) -> CoordinationResult<()> {
        let session = self.live_session()?;
        self.service.delete(session, path).await
    }

    pub async fn get_children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        let session = self.live_session()?;
        self.service.get_children(session, path).await
    }

    pub async fn watch_children(&self, path: &str) -> CoordinationResult<()> {
        let session = self.live_session()?;
        self.service.watch_children(session, path).await
    }

    pub async fn unwatch_children(&self, path: &str) -> CoordinationResult<()> {
        let session = self.live_session()?;
        self.service.unwatch_children(session, path).await
    }
}

/// Background task owning session establishment and the session event pump
struct SessionLoop {
    service: Arc<dyn CoordinationService>,
    config: CoordinationConfig,
    retry: Arc<dyn RetryPolicy>,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<CoordinationEvent>,
    shutdown: watch::Receiver<bool>,
}

impl SessionLoop {
    async fn run(mut self) {
        loop {
            let Some(session) = self.establish().await else {
                return;
            };
            let Session { id, mut events } = session;
            info!("Coordination session {} established", id);
            self.status.send_replace(ConnectionStatus::Connected(id));
            self.publish(CoordinationEvent::Connected { session: id });

            loop {
                tokio::select! {
                    biased;
                    _ = self.shutdown.changed() => return,
                    event = events.recv() => match event {
                        Some(SessionEvent::Disconnected) => {
                            warn!("Coordination session {} suspended", id);
                            self.status.send_replace(ConnectionStatus::Suspended(id));
                            self.publish(CoordinationEvent::Suspended);
                        }
                        Some(SessionEvent::Reconnected) => {
                            info!("Coordination session {} reconnected", id);
                            self.status.send_replace(ConnectionStatus::Connected(id));
                            self.publish(CoordinationEvent::Reconnected { session: id });
                        }
                        Some(SessionEvent::ChildrenChanged { path }) => {
                            self.publish(CoordinationEvent::ChildrenChanged { path });
                        }
                        Some(SessionEvent::Expired) | None => {
                            warn!("Coordination session {} lost", id);
                            self.status.send_replace(ConnectionStatus::Connecting);
                            self.publish(CoordinationEvent::Lost);
                            break;
                        }
                    },
                }
            }
        }
    }

    fn publish(&self, event: CoordinationEvent) {
        // No subscribers is fine: groups may not have started yet.
        let _ = self.events.send(event);
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Open a session, retrying per policy; `None` when giving up or closing
    async fn establish(&mut self) -> Option<Session> {
        let mut attempt: u32 = 0;
        loop {
            if self.stopping() {
                return None;
            }
            attempt += 1;
            let request = ConnectRequest {
                connect_string: self.config.connect_string.clone(),
                session_timeout: self.config.session_timeout,
                credentials: self.config.credentials.clone(),
            };
            let outcome = tokio::time::timeout(
                self.config.connection_timeout,
                self.service.connect(request),
            )
            .await
            .unwrap_or_else(|_| {
                Err(CoordinationError::Timeout(
                    self.config.connection_timeout.as_millis() as u64,
                ))
            });

            let err = match outcome {
                Ok(session) if self.stopping() => {
                    let _ = self.service.close_session(session.id).await;
                    return None;
                }
                Ok(session) => return Some(session),
                Err(err) => err,
            };

            if !err.is_retryable() {
                error!(
                    "Giving up connecting to {}: {}",
                    self.config.describe(),
                    err
                );
                self.status.send_replace(ConnectionStatus::Disconnected);
                return None;
            }

            let Some(delay) = self.retry.next_delay(attempt) else {
                error!(
                    "Giving up connecting to {} after {} attempt(s): {}",
                    self.config.describe(),
                    attempt,
                    err
                );
                self.status.send_replace(ConnectionStatus::Disconnected);
                return None;
            };

            debug!(
                "Connect attempt {} to {} failed ({}); retrying in {:?}",
                attempt,
                self.config.describe(),
                err,
                delay
            );
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
