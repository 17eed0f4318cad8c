use super::endpoint::MasterEndpoint;
use crate::connection::retry::RetryPolicy;
use crate::core::{ConsumerNodeState, MasterError, Result};
use crate::group::{Group, GroupEvent, GroupLifecycle, GroupListener};
use crate::routing::{Consumer, Endpoint, Processor, Suspendable};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, info_span};

/// Pending commands per consumer before group notifications wait.
const COMMAND_BUFFER: usize = 16;

/// Health view of a master consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MasterStatus {
    pub connected: bool,
    pub master: bool,
    pub delegate_running: bool,
    pub suspended: bool,
}

enum Command {
    Reconcile,
    Demote,
    Suspend(oneshot::Sender<Result<()>>),
    Resume(oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Default)]
struct Flags {
    delegate_running: AtomicBool,
    suspended: AtomicBool,
}

/// Where the consumer gets a group from when it (re)starts.
enum GroupSource {
    /// A fresh group from the endpoint whenever the previous one is closed.
    Endpoint,
    /// Always the group given at construction.
    Fixed,
}

struct Running {
    commands: mpsc::Sender<Command>,
    listener: Arc<dyn GroupListener<ConsumerNodeState>>,
    task: JoinHandle<()>,
}

/// Consumer that runs a delegate consumer only while this process is the
/// master of its group.
///
/// Group notifications are turned into commands for a single worker task
/// that owns the delegate, so promotion and demotion never run concurrently
/// and never block the group's event task.
pub struct MasterConsumer {
    endpoint: MasterEndpoint,
    processor: Arc<dyn Processor>,
    group: RwLock<Arc<dyn Group<ConsumerNodeState>>>,
    source: GroupSource,
    container: String,
    flags: Arc<Flags>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl MasterConsumer {
    pub fn new(endpoint: MasterEndpoint, processor: Arc<dyn Processor>) -> Result<Self> {
        let group = Arc::new(endpoint.create_group()?);
        Ok(Self::build(endpoint, processor, group, GroupSource::Endpoint))
    }

    /// Consumer bound to an existing group instead of a fresh one.
    ///
    /// The group is not replaced after `stop()` closes it, so such a
    /// consumer cannot be started again.
    pub fn with_group(
        endpoint: MasterEndpoint,
        processor: Arc<dyn Processor>,
        group: Arc<dyn Group<ConsumerNodeState>>,
    ) -> Self {
        Self::build(endpoint, processor, group, GroupSource::Fixed)
    }

    fn build(
        endpoint: MasterEndpoint,
        processor: Arc<dyn Processor>,
        group: Arc<dyn Group<ConsumerNodeState>>,
        source: GroupSource,
    ) -> Self {
        let container = endpoint.component().new_container_id();
        Self {
            endpoint,
            processor,
            group: RwLock::new(group),
            source,
            container,
            flags: Arc::new(Flags::default()),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// The group of the current (or last) run.
    pub fn group(&self) -> Arc<dyn Group<ConsumerNodeState>> {
        self.group
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Group for the next run; a closed group is replaced when possible.
    fn group_for_start(&self) -> Result<Arc<dyn Group<ConsumerNodeState>>> {
        let current = self.group();
        if current.lifecycle() != GroupLifecycle::Closed {
            return Ok(current);
        }
        match self.source {
            GroupSource::Fixed => Err(MasterError::Closed(current.path().to_string())),
            GroupSource::Endpoint => {
                let fresh: Arc<dyn Group<ConsumerNodeState>> =
                    Arc::new(self.endpoint.create_group()?);
                *self.group.write()? = fresh.clone();
                Ok(fresh)
            }
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn status(&self) -> MasterStatus {
        let group = self.group();
        MasterStatus {
            connected: group.is_connected(),
            master: group.is_master(),
            delegate_running: self.flags.delegate_running.load(Ordering::SeqCst),
            suspended: self.flags.suspended.load(Ordering::SeqCst),
        }
    }

    pub fn is_delegate_running(&self) -> bool {
        self.flags.delegate_running.load(Ordering::SeqCst)
    }

    fn node_state(&self, started: bool) -> ConsumerNodeState {
        ConsumerNodeState::new(self.endpoint.group_name(), self.container.clone())
            .with_consumer(self.endpoint.child_uri())
            .with_started(started)
    }

    async fn forward(&self, suspend: bool) -> Result<()> {
        let commands = self
            .running
            .lock()
            .await
            .as_ref()
            .map(|running| running.commands.clone());
        let Some(commands) = commands else {
            self.flags.suspended.store(suspend, Ordering::SeqCst);
            return Ok(());
        };

        let (reply, outcome) = oneshot::channel();
        let command = if suspend {
            Command::Suspend(reply)
        } else {
            Command::Resume(reply)
        };
        let closed = || MasterError::Closed(self.endpoint.endpoint_uri().to_string());
        commands.send(command).await.map_err(|_| closed())?;
        outcome.await.map_err(|_| closed())?
    }
}

#[async_trait]
impl Consumer for MasterConsumer {
    async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let group = self.group_for_start()?;
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let worker = Worker {
            endpoint: self.endpoint.clone(),
            processor: self.processor.clone(),
            group: group.clone(),
            template: self.node_state(false),
            flags: self.flags.clone(),
            delegate: None,
            promotion_retry: self
                .endpoint
                .component()
                .config()
                .promotion_retry
                .build(),
            failed_promotions: 0,
            retry_timer: None,
            commands: commands.downgrade(),
        };
        let span = info_span!("master_consumer", group = %group.path(), container = %self.container);
        let task = tokio::spawn(worker.run(receiver).instrument(span));

        let listener: Arc<dyn GroupListener<ConsumerNodeState>> = Arc::new(MasterListener {
            commands: commands.clone(),
        });
        group.add(listener.clone());

        let started = async {
            group.start().await?;
            group.update(self.node_state(false)).await
        }
        .await;
        if let Err(err) = started {
            group.remove(&listener);
            let (ack, done) = oneshot::channel();
            if commands.send(Command::Shutdown(ack)).await.is_ok() {
                let _ = done.await;
            }
            // Ends the group's event task; the next start builds a new group.
            if let Err(close_err) = group.close().await {
                debug!("Closing group {} after failed start: {}", group.path(), close_err);
            }
            return Err(err);
        }

        info!(
            "Master consumer for {} joined group {} as {}",
            self.endpoint.child_uri(),
            group.path(),
            self.container
        );
        *running = Some(Running {
            commands,
            listener,
            task,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let group = self.group();
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            group.remove(&running.listener);
            let (ack, done) = oneshot::channel();
            if running.commands.send(Command::Shutdown(ack)).await.is_ok() {
                let _ = done.await;
            }
            drop(running.commands);
            if let Err(err) = running.task.await {
                warn!("Master consumer worker ended abnormally: {}", err);
            }
        }
        // Releases the entry only after the delegate is down.
        group.close().await
    }

    fn as_suspendable(&self) -> Option<&dyn Suspendable> {
        Some(self)
    }
}

#[async_trait]
impl Suspendable for MasterConsumer {
    async fn suspend(&self) -> Result<()> {
        self.forward(true).await
    }

    async fn resume(&self) -> Result<()> {
        self.forward(false).await
    }

    fn is_suspended(&self) -> bool {
        self.flags.suspended.load(Ordering::SeqCst)
    }
}

/// Maps group events to worker commands.
struct MasterListener {
    commands: mpsc::Sender<Command>,
}

#[async_trait]
impl GroupListener<ConsumerNodeState> for MasterListener {
    async fn group_event(&self, _group: &dyn Group<ConsumerNodeState>, event: GroupEvent) {
        let command = match event {
            GroupEvent::Changed => Command::Reconcile,
            GroupEvent::Disconnected => Command::Demote,
            GroupEvent::Connected => return,
        };
        if self.commands.send(command).await.is_err() {
            debug!("Master consumer already stopped; dropping {}", event);
        }
    }
}

/// Owns the delegate consumer; the only place it is started or stopped.
struct Worker {
    endpoint: MasterEndpoint,
    processor: Arc<dyn Processor>,
    group: Arc<dyn Group<ConsumerNodeState>>,
    /// State published with `started` overridden.
    template: ConsumerNodeState,
    flags: Arc<Flags>,
    delegate: Option<Box<dyn Consumer>>,
    promotion_retry: Box<dyn RetryPolicy>,
    failed_promotions: u32,
    retry_timer: Option<JoinHandle<()>>,
    commands: mpsc::WeakSender<Command>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Reconcile => self.reconcile().await,
                Command::Demote => self.demote("disconnected from group", true).await,
                Command::Suspend(reply) => {
                    let _ = reply.send(self.set_suspended(true).await);
                }
                Command::Resume(reply) => {
                    let _ = reply.send(self.set_suspended(false).await);
                }
                Command::Shutdown(reply) => {
                    self.demote("stopping", false).await;
                    let _ = reply.send(());
                    return;
                }
            }
        }
        self.demote("stopping", false).await;
    }

    async fn reconcile(&mut self) {
        let master = self.group.is_connected() && self.group.is_master();
        if master {
            if self.delegate.is_none() {
                self.promote().await;
            }
        } else if self.delegate.is_some() {
            self.demote("no longer master", true).await;
        }
    }

    async fn promote(&mut self) {
        let uri = self.endpoint.child_uri().to_string();
        let span = info_span!("promote", group = %self.group.path(), consumer = %uri);
        let outcome = self.start_delegate().instrument(span).await;

        match outcome {
            Ok(delegate) => {
                self.delegate = Some(delegate);
                self.flags.delegate_running.store(true, Ordering::SeqCst);
                self.failed_promotions = 0;
                self.cancel_retry();
                info!("Elected as master. Consumer started: {}", uri);
                self.publish(true).await;
            }
            Err(err) => {
                error!("Failed to start master consumer for {}: {}", uri, err);
                self.schedule_retry();
            }
        }
    }

    /// Starts the child endpoint and a delegate on it; nothing stays
    /// started on failure.
    async fn start_delegate(&self) -> Result<Box<dyn Consumer>> {
        let child = self.endpoint.child();
        child.start().await?;

        let delegate = match child.create_consumer(self.processor.clone()) {
            Ok(delegate) => delegate,
            Err(err) => {
                self.stop_child().await;
                return Err(err);
            }
        };
        if let Err(err) = delegate.start().await {
            if let Err(stop_err) = delegate.stop().await {
                debug!("Stopping half-started consumer failed: {}", stop_err);
            }
            self.stop_child().await;
            return Err(err);
        }

        if self.flags.suspended.load(Ordering::SeqCst) {
            if let Some(suspendable) = delegate.as_suspendable() {
                if let Err(err) = suspendable.suspend().await {
                    warn!("Could not suspend new master consumer: {}", err);
                }
            }
        }
        Ok(delegate)
    }

    async fn demote(&mut self, reason: &str, publish: bool) {
        self.cancel_retry();
        self.failed_promotions = 0;

        let Some(delegate) = self.delegate.take() else {
            return;
        };
        if let Err(err) = delegate.stop().await {
            warn!("Error stopping master consumer: {}", err);
        }
        self.stop_child().await;
        self.flags.delegate_running.store(false, Ordering::SeqCst);
        info!(
            "Master consumer stopped ({}): {}",
            reason,
            self.endpoint.child_uri()
        );

        if publish {
            self.publish(false).await;
        }
    }

    async fn stop_child(&self) {
        if let Err(err) = self.endpoint.child().stop().await {
            warn!("Error stopping {}: {}", self.endpoint.child_uri(), err);
        }
    }

    async fn publish(&self, started: bool) {
        let state = self.template.clone().with_started(started);
        if let Err(err) = self.group.update(state).await {
            warn!(
                "Could not publish state to group {}: {}",
                self.group.path(),
                err
            );
        }
    }

    async fn set_suspended(&mut self, suspend: bool) -> Result<()> {
        self.flags.suspended.store(suspend, Ordering::SeqCst);
        let Some(suspendable) = self
            .delegate
            .as_ref()
            .and_then(|delegate| delegate.as_suspendable())
        else {
            return Ok(());
        };
        if suspend {
            suspendable.suspend().await
        } else {
            suspendable.resume().await
        }
    }

    fn schedule_retry(&mut self) {
        self.failed_promotions += 1;
        let Some(delay) = self.promotion_retry.next_delay(self.failed_promotions) else {
            warn!(
                "Giving up promotion retries after {} attempt(s); waiting for the next group change",
                self.failed_promotions
            );
            return;
        };
        debug!(
            "Retrying promotion in {:?} (attempt {})",
            delay, self.failed_promotions
        );

        self.cancel_retry();
        let commands = self.commands.clone();
        self.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Reconcile).await;
            }
        }));
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }
}
