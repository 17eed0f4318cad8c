use super::{Group, GroupEvent, GroupLifecycle, GroupListener, GroupMember, same_listener};
use crate::connection::{ConnectionStatus, CoordinationConnection, CoordinationEvent};
use crate::coordination::{CreateMode, SessionId, join_path, node_name, sequence_of, validate_path};
use crate::core::{CoordinationError, MasterError, NodeState, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{Instrument, Level, event, info_span};

/// Prefix of member entry names; the ensemble appends the sequence.
pub const MEMBER_PREFIX: &str = "member-";

struct GroupSnapshot<T> {
    lifecycle: GroupLifecycle,
    session: Option<SessionId>,
    /// Full path of this member's entry in the current session.
    own_entry: Option<String>,
    last_state: Option<T>,
    roster: Vec<GroupMember<T>>,
}

struct GroupInner<T: NodeState> {
    path: String,
    connection: Arc<CoordinationConnection>,
    snapshot: Mutex<GroupSnapshot<T>>,
    listeners: Mutex<Vec<Arc<dyn GroupListener<T>>>>,
    /// Serializes entry creation and writes.
    publish: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
}

/// Group backed by ephemeral sequential entries on a coordination service.
///
/// Connection and watch events are consumed by one task per group, which
/// re-reads the roster and notifies listeners serially, in the order the
/// events were observed.
pub struct ZooKeeperGroup<T: NodeState> {
    inner: Arc<GroupInner<T>>,
}

impl<T: NodeState> Clone for ZooKeeperGroup<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: NodeState> ZooKeeperGroup<T> {
    pub fn new(connection: Arc<CoordinationConnection>, path: &str) -> Result<Self> {
        validate_path(path).map_err(MasterError::Configuration)?;
        if path == "/" {
            return Err(MasterError::Configuration(
                "group path must not be the root".to_string(),
            ));
        }
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(GroupInner {
                path: path.to_string(),
                connection,
                snapshot: Mutex::new(GroupSnapshot {
                    lifecycle: GroupLifecycle::Created,
                    session: None,
                    own_entry: None,
                    last_state: None,
                    roster: Vec::new(),
                }),
                listeners: Mutex::new(Vec::new()),
                publish: tokio::sync::Mutex::new(()),
                shutdown,
            }),
        })
    }

    /// Name of this member's entry, once created.
    pub fn own_entry(&self) -> Option<String> {
        self.inner.snapshot().own_entry.clone()
    }

    pub fn connection(&self) -> &Arc<CoordinationConnection> {
        &self.inner.connection
    }
}

impl<T: NodeState> GroupInner<T> {
    fn snapshot(&self) -> MutexGuard<'_, GroupSnapshot<T>> {
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_closed(&self) -> bool {
        self.snapshot().lifecycle == GroupLifecycle::Closed
    }

    async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<CoordinationEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if let ConnectionStatus::Connected(session) = self.connection.status() {
            self.on_connected(session).await;
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                received = events.recv() => match received {
                    Ok(CoordinationEvent::Connected { session })
                    | Ok(CoordinationEvent::Reconnected { session }) => {
                        self.on_connected(session).await;
                    }
                    Ok(CoordinationEvent::Suspended) => self.on_disconnected(false).await,
                    Ok(CoordinationEvent::Lost) => self.on_disconnected(true).await,
                    Ok(CoordinationEvent::ChildrenChanged { path }) if path == self.path => {
                        self.refresh().await;
                    }
                    Ok(CoordinationEvent::ChildrenChanged { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "Group {} missed {} coordination events; re-reading roster",
                            self.path, skipped
                        );
                        self.resync().await;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Group {} event loop stopped", self.path);
    }

    /// Re-derives state from the connection after lost notifications.
    async fn resync(self: &Arc<Self>) {
        match self.connection.status() {
            ConnectionStatus::Connected(session) => {
                let known = self.snapshot().session;
                if known == Some(session) {
                    self.refresh().await;
                } else {
                    self.on_disconnected(true).await;
                    self.on_connected(session).await;
                }
            }
            ConnectionStatus::Suspended(_) => self.on_disconnected(false).await,
            _ => self.on_disconnected(true).await,
        }
    }

    async fn on_connected(self: &Arc<Self>, session: SessionId) {
        {
            let mut snapshot = self.snapshot();
            match snapshot.lifecycle {
                GroupLifecycle::Closed | GroupLifecycle::Created => return,
                GroupLifecycle::Connected if snapshot.session == Some(session) => return,
                _ => {}
            }
            if snapshot.session != Some(session) {
                snapshot.own_entry = None;
                snapshot.roster.clear();
            }
            snapshot.session = Some(session);
            snapshot.lifecycle = GroupLifecycle::Connected;
        }
        info!("Group {} connected (session {})", self.path, session);
        self.fire(GroupEvent::Connected).await;

        if let Err(err) = self.prepare().await {
            warn!("Failed to watch group path {}: {}", self.path, err);
            return;
        }
        if let Err(err) = self.flush().await {
            warn!("Failed to publish state to group {}: {}", self.path, err);
        }
        self.refresh().await;
    }

    async fn on_disconnected(self: &Arc<Self>, lost: bool) {
        let was_connected = {
            let mut snapshot = self.snapshot();
            if matches!(
                snapshot.lifecycle,
                GroupLifecycle::Closed | GroupLifecycle::Created
            ) {
                return;
            }
            let was_connected = snapshot.lifecycle == GroupLifecycle::Connected;
            snapshot.lifecycle = GroupLifecycle::Disconnected;
            if lost {
                snapshot.session = None;
                snapshot.own_entry = None;
                snapshot.roster.clear();
            }
            was_connected
        };
        if was_connected {
            warn!(
                "Group {} disconnected ({})",
                self.path,
                if lost { "session lost" } else { "link suspended" }
            );
            self.fire(GroupEvent::Disconnected).await;
        }
    }

    async fn prepare(&self) -> std::result::Result<(), CoordinationError> {
        self.connection.ensure_path(&self.path).await?;
        self.connection.watch_children(&self.path).await
    }

    /// Writes the last known state, creating this member's entry if needed.
    async fn flush(&self) -> Result<()> {
        let _guard = self.publish.lock().await;

        let (state, entry, session) = {
            let snapshot = self.snapshot();
            if snapshot.lifecycle != GroupLifecycle::Connected {
                return Ok(());
            }
            let (Some(state), Some(session)) = (snapshot.last_state.clone(), snapshot.session)
            else {
                return Ok(());
            };
            (state, snapshot.own_entry.clone(), session)
        };
        let data = serde_json::to_vec(&state)?;

        if let Some(entry) = entry {
            match self.connection.set_data(&entry, data.clone()).await {
                Ok(()) => return Ok(()),
                Err(CoordinationError::NoNode(_)) => {
                    debug!("Entry {} vanished; recreating", entry);
                }
                Err(err) => return Err(err.into()),
            }
        }

        let prefix = join_path(&self.path, MEMBER_PREFIX);
        let created = self
            .connection
            .create_in(session, &prefix, data, CreateMode::EphemeralSequential)
            .await?;
        event!(Level::DEBUG, group = %self.path, entry = %created, "group entry created");

        let mut snapshot = self.snapshot();
        if snapshot.session == Some(session) {
            snapshot.own_entry = Some(created);
        }
        Ok(())
    }

    async fn refresh(self: &Arc<Self>) {
        let names = match self.connection.get_children(&self.path).await {
            Ok(names) => names,
            Err(err) => {
                debug!("Could not list group {}: {}", self.path, err);
                return;
            }
        };

        let mut roster = Vec::with_capacity(names.len());
        for name in names {
            let Some(sequence) = sequence_of(&name) else {
                continue;
            };
            let entry = join_path(&self.path, &name);
            let state = match self.connection.get_data(&entry).await {
                Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
                    Ok(state) => Some(state),
                    Err(err) => {
                        warn!("Undecodable state in {}: {}", entry, err);
                        None
                    }
                },
                Err(CoordinationError::NoNode(_)) => continue,
                Err(err) => {
                    debug!("Could not read {}: {}", entry, err);
                    return;
                }
            };
            roster.push(GroupMember {
                name,
                sequence,
                state,
            });
        }
        roster.sort_by_key(|member| member.sequence);

        {
            let mut snapshot = self.snapshot();
            if snapshot.lifecycle != GroupLifecycle::Connected {
                return;
            }
            snapshot.roster = roster;
        }
        self.fire(GroupEvent::Changed).await;
    }

    async fn fire(self: &Arc<Self>, group_event: GroupEvent) {
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let handle = ZooKeeperGroup {
            inner: self.clone(),
        };
        let span = info_span!("group_event", group = %self.path, event = %group_event);
        async {
            for listener in listeners {
                if self.is_closed() {
                    return;
                }
                listener.group_event(&handle, group_event).await;
            }
        }
        .instrument(span)
        .await;
    }
}

#[async_trait]
impl<T: NodeState> Group<T> for ZooKeeperGroup<T> {
    fn path(&self) -> &str {
        &self.inner.path
    }

    async fn start(&self) -> Result<()> {
        {
            let mut snapshot = self.inner.snapshot();
            match snapshot.lifecycle {
                GroupLifecycle::Created => snapshot.lifecycle = GroupLifecycle::Starting,
                GroupLifecycle::Closed => return Err(MasterError::Closed(self.inner.path.clone())),
                _ => return Ok(()),
            }
        }

        // Subscribe before starting so the first Connected event is not missed.
        let events = self.inner.connection.subscribe();
        let shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(self.inner.clone().run(events, shutdown));

        self.inner.connection.start().await?;
        info!("Group {} started", self.inner.path);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        {
            let mut snapshot = self.inner.snapshot();
            if snapshot.lifecycle == GroupLifecycle::Closed {
                return Ok(());
            }
            snapshot.lifecycle = GroupLifecycle::Closed;
        }
        self.inner.shutdown.send_replace(true);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();

        // Wait for an in-flight write so its entry is removed too.
        let _guard = self.inner.publish.lock().await;
        let entry = {
            let mut snapshot = self.inner.snapshot();
            snapshot.roster.clear();
            snapshot.own_entry.take()
        };
        if let Some(entry) = entry {
            match self.inner.connection.delete(&entry).await {
                Ok(()) | Err(CoordinationError::NoNode(_)) => {}
                Err(err) => warn!("Failed to delete group entry {}: {}", entry, err),
            }
        }
        if let Err(err) = self.inner.connection.unwatch_children(&self.inner.path).await {
            debug!("Failed to unwatch {}: {}", self.inner.path, err);
        }
        info!("Group {} closed", self.inner.path);
        Ok(())
    }

    fn lifecycle(&self) -> GroupLifecycle {
        self.inner.snapshot().lifecycle
    }

    fn is_connected(&self) -> bool {
        self.inner.snapshot().lifecycle == GroupLifecycle::Connected
    }

    fn is_master(&self) -> bool {
        let snapshot = self.inner.snapshot();
        if snapshot.lifecycle != GroupLifecycle::Connected {
            return false;
        }
        let (Some(own), Some(first)) = (snapshot.own_entry.as_deref(), snapshot.roster.first())
        else {
            return false;
        };
        node_name(own) == first.name
    }

    async fn update(&self, state: T) -> Result<()> {
        {
            let mut snapshot = self.inner.snapshot();
            if snapshot.lifecycle == GroupLifecycle::Closed {
                return Err(MasterError::Closed(self.inner.path.clone()));
            }
            snapshot.last_state = Some(state);
        }
        match self.inner.flush().await {
            Ok(()) => Ok(()),
            Err(MasterError::Coordination(err)) => {
                // Flushed again once the session is back.
                debug!("Deferred state write to {}: {}", self.inner.path, err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn add(&self, listener: Arc<dyn GroupListener<T>>) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    fn remove(&self, listener: &Arc<dyn GroupListener<T>>) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|registered| !same_listener(registered, listener));
    }

    fn roster(&self) -> Vec<GroupMember<T>> {
        self.inner.snapshot().roster.clone()
    }

    fn last_state(&self) -> Option<T> {
        self.inner.snapshot().last_state.clone()
    }
}
