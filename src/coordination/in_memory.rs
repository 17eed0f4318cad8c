#[derive(Debug, Clone)]
struct InMemoryNode {
    data: Vec<u8>,
    ephemeral_owner: Option<SessionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionLink {
    Connected,
    Suspended,
}

struct InMemorySession {
    link: SessionLink,
    events: mpsc::UnboundedSender<SessionEvent>,
    watches: HashSet<String>,
}

struct EnsembleState {
    nodes: BTreeMap<String, InMemoryNode>,
    sessions: HashMap<SessionId, InMemorySession>,
    sequences: HashMap<String, u64>,
    next_session: SessionId,
    available: bool,
    required_credentials: Option<Credentials>,
    connect_delay: Duration,
}

impl Default for EnsembleState {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            sessions: HashMap::new(),
            sequences: HashMap::new(),
            next_session: 0,
            available: true,
            required_credentials: None,
            connect_delay: Duration::ZERO,
        }
    }
}

impl EnsembleState {
    fn check_session(&self, session: SessionId) -> CoordinationResult<()> {
        match self.sessions.get(&session) {
            None => Err(CoordinationError::SessionExpired(session)),
            Some(entry) if entry.link == SessionLink::Suspended => {
                Err(CoordinationError::ConnectionLoss)
            }
            Some(_) => Ok(()),
        }
    }

    fn node_exists(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| &key[prefix.len()..])
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect()
    }

    fn notify_children_changed(&self, parent: &str) {
        for entry in self.sessions.values() {
            if entry.link == SessionLink::Connected && entry.watches.contains(parent) {
                let _ = entry.events.send(SessionEvent::ChildrenChanged {
                    path: parent.to_string(),
                });
            }
        }
    }

    fn insert_node(
        &mut self,
        path: &str,
        data: Vec<u8>,
        owner: Option<SessionId>,
    ) -> CoordinationResult<()> {
        let parent = parent_path(path)
            .ok_or_else(|| CoordinationError::NodeExists(path.to_string()))?
            .to_string();
        if !self.node_exists(&parent) {
            return Err(CoordinationError::NoNode(parent));
        }
        if self.node_exists(path) {
            return Err(CoordinationError::NodeExists(path.to_string()));
        }
        self.nodes.insert(
            path.to_string(),
            InMemoryNode {
                data,
                ephemeral_owner: owner,
            },
        );
        self.notify_children_changed(&parent);
        Ok(())
    }

    fn remove_ephemerals(&mut self, owner: SessionId) {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(owner))
            .map(|(path, _)| path.clone())
            .collect();

        let mut parents = Vec::new();
        for path in owned {
            self.nodes.remove(&path);
            if let Some(parent) = parent_path(&path) {
                if !parents.iter().any(|p: &String| p == parent) {
                    parents.push(parent.to_string());
                }
            }
        }
        for parent in parents {
            self.notify_children_changed(&parent);
        }
    }
}

/// An in-process coordination ensemble.
///
/// Implements the ZooKeeper node model (persistent, ephemeral and ephemeral
/// sequential nodes, sessions, children watches) in memory, and lets callers
/// inject connectivity faults to drive failover scenarios.
#[derive(Clone, Default)]
pub struct InMemoryEnsemble {
    state: Arc<Mutex<EnsembleState>>,
}

impl InMemoryEnsemble {
    /// Creates a new, empty ensemble.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EnsembleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes new connection attempts fail with `Unavailable` while false.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Requires every new session to present these credentials.
    pub fn require_credentials(&self, credentials: Option<Credentials>) {
        self.lock().required_credentials = credentials;
    }

    /// Delays every connection attempt, to exercise connection timeouts.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = delay;
    }

    /// Drops the connection of a session without expiring it.
    ///
    /// Returns false if the session is unknown or already suspended.
    pub fn suspend_session(&self, session: SessionId) -> bool {
        let mut state = self.lock();
        match state.sessions.get_mut(&session) {
            Some(entry) if entry.link == SessionLink::Connected => {
                entry.link = SessionLink::Suspended;
                let _ = entry.events.send(SessionEvent::Disconnected);
                true
            }
            _ => false,
        }
    }

    /// Restores the connection of a suspended session.
    pub fn resume_session(&self, session: SessionId) -> bool {
        let mut state = self.lock();
        match state.sessions.get_mut(&session) {
            Some(entry) if entry.link == SessionLink::Suspended => {
                entry.link = SessionLink::Connected;
                let _ = entry.events.send(SessionEvent::Reconnected);
                true
            }
            _ => false,
        }
    }

    /// Expires a session: its ephemeral nodes are deleted and its owner is told.
    pub fn expire_session(&self, session: SessionId) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.sessions.remove(&session) else {
            return false;
        };
        let _ = entry.events.send(SessionEvent::Expired);
        state.remove_ephemerals(session);
        true
    }

    /// Returns the sorted child names of a node.
    pub fn children(&self, path: &str) -> Vec<String> {
        self.lock().children_of(path)
    }

    /// Returns the data of a node, if it exists.
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().nodes.get(path).map(|node| node.data.clone())
    }

    pub fn node_exists(&self, path: &str) -> bool {
        self.lock().node_exists(path)
    }

    pub fn ephemeral_owner(&self, path: &str) -> Option<SessionId> {
        self.lock()
            .nodes
            .get(path)
            .and_then(|node| node.ephemeral_owner)
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_session_alive(&self, session: SessionId) -> bool {
        self.lock().sessions.contains_key(&session)
    }
}

#[async_trait]
impl CoordinationService for InMemoryEnsemble {
    async fn connect(&self, request: ConnectRequest) -> CoordinationResult<Session> {
        let delay = self.lock().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if !state.available {
            return Err(CoordinationError::Unavailable(format!(
                "no ensemble member reachable at '{}'",
                request.connect_string
            )));
        }
        if let Some(required) = state.required_credentials.as_ref() {
            let accepted = request.credentials.as_ref().is_some_and(|presented| {
                presented.scheme == required.scheme && presented.auth() == required.auth()
            });
            if !accepted {
                return Err(CoordinationError::AuthFailed(required.scheme.clone()));
            }
        }

        state.next_session += 1;
        let id = state.next_session;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        state.sessions.insert(
            id,
            InMemorySession {
                link: SessionLink::Connected,
                events: events_tx,
                watches: HashSet::new(),
            },
        );
        Ok(Session {
            id,
            events: events_rx,
        })
    }

    async fn close_session(&self, session: SessionId) -> CoordinationResult<()> {
        let mut state = self.lock();
        if state.sessions.remove(&session).is_some() {
            state.remove_ephemerals(session);
        }
        Ok(())
    }

    async fn create(
        &self,
        session: SessionId,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> CoordinationResult<String> {
        let mut state = self.lock();
        state.check_session(session)?;

        let actual = if mode == CreateMode::EphemeralSequential {
            let parent = parent_path(path)
                .ok_or_else(|| CoordinationError::InvalidPath(path.to_string()))?
                .to_string();
            let counter = state.sequences.entry(parent).or_insert(0);
            *counter += 1;
            format!("{}{:0width$}", path, *counter, width = SEQUENCE_WIDTH)
        } else {
            path.to_string()
        };
        validate_path(&actual).map_err(CoordinationError::InvalidPath)?;

        let owner = mode.is_ephemeral().then_some(session);
        state.insert_node(&actual, data, owner)?;
        Ok(actual)
    }

    async fn ensure_path(&self, session: SessionId, path: &str) -> CoordinationResult<()> {
        validate_path(path).map_err(CoordinationError::InvalidPath)?;
        let mut state = self.lock();
        state.check_session(session)?;

        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            if !state.node_exists(&current) {
                state.insert_node(&current, Vec::new(), None)?;
            }
        }
        Ok(())
    }

    async fn exists(&self, session: SessionId, path: &str) -> CoordinationResult<bool> {
        let state = self.lock();
        state.check_session(session)?;
        Ok(state.node_exists(path))
    }

    async fn get_data(&self, session: SessionId, path: &str) -> CoordinationResult<Vec<u8>> {
        let state = self.lock();
        state.check_session(session)?;
        state
            .nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    async fn set_data(
        &self,
        session: SessionId,
        path: &str,
        data: Vec<u8>,
    ) -> CoordinationResult<()> {
        let mut state = self.lock();
        state.check_session(session)?;
        let node = state
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?;
        node.data = data;
        if let Some(parent) = parent_path(path) {
            state.notify_children_changed(parent);
        }
        Ok(())
    }

    async fn delete(&self, session: SessionId, path: &str) -> CoordinationResult<()> {
        let mut state = self.lock();
        state.check_session(session)?;
        if path == "/" {
            return Err(CoordinationError::InvalidPath(path.to_string()));
        }
        if !state.nodes.contains_key(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        if !state.children_of(path).is_empty() {
            return Err(CoordinationError::NotEmpty(path.to_string()));
        }
        state.nodes.remove(path);
        if let Some(parent) = parent_path(path) {
            state.notify_children_changed(parent);
        }
        Ok(())
    }

    async fn get_children(
        &self,
        session: SessionId,
        path: &str,
    ) -> CoordinationResult<Vec<String>> {
        let state = self.lock();
        state.check_session(session)?;
        if !state.node_exists(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        Ok(state.children_of(path))
    }

    async fn watch_children(&self, session: SessionId, path: &str) -> CoordinationResult<()> {
        let mut state = self.lock();
        state.check_session(session)?;
        if let Some(entry) = state.sessions.get_mut(&session) {
            entry.watches.insert(path.to_string());
        }
        Ok(())
    }

    async fn unwatch_children(&self, session: SessionId, path: &str) -> CoordinationResult<()> {
        let mut state = self.lock();
        if let Some(entry) = state.sessions.get_mut(&session) {
            entry.watches.remove(path);
        }
        Ok(())
    }
}
