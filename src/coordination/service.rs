/// Identifier of a coordination session.
pub type SessionId = u64;

pub type CoordinationResult<T> = std::result::Result<T, CoordinationError>;

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    /// Removed with the owning session; the name gets a monotonically
    /// increasing 10 digit suffix.
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }
}

/// Notifications delivered on a session's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection to the ensemble dropped; the session may still be alive.
    Disconnected,
    /// Connection restored before the session expired.
    Reconnected,
    /// Session is gone together with its ephemeral nodes.
    Expired,
    /// A child of a watched path was created, deleted or had its data changed.
    ChildrenChanged { path: String },
}

/// Parameters for opening a session.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub connect_string: String,
    pub session_timeout: Duration,
    pub credentials: Option<Credentials>,
}

/// An open session and the stream of its events.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// ZooKeeper-style coordination client.
///
/// Every operation is scoped to a session. Operations on a session whose
/// connection is down fail with `ConnectionLoss`; operations on an expired or
/// closed session fail with `SessionExpired`.
#[async_trait]
pub trait CoordinationService: Send + Sync {
    /// Opens a new session.
    async fn connect(&self, request: ConnectRequest) -> CoordinationResult<Session>;

    /// Closes a session, removing its ephemeral nodes.
    async fn close_session(&self, session: SessionId) -> CoordinationResult<()>;

    /// Creates a node and returns its actual path.
    async fn create(
        &self,
        session: SessionId,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> CoordinationResult<String>;

    /// Creates every missing persistent node along `path`.
    async fn ensure_path(&self, session: SessionId, path: &str) -> CoordinationResult<()>;

    async fn exists(&self, session: SessionId, path: &str) -> CoordinationResult<bool>;

    async fn get_data(&self, session: SessionId, path: &str) -> CoordinationResult<Vec<u8>>;

    async fn set_data(&self, session: SessionId, path: &str, data: Vec<u8>)
    -> CoordinationResult<()>;

    async fn delete(&self, session: SessionId, path: &str) -> CoordinationResult<()>;

    /// Returns the names (not paths) of the children of `path`, sorted.
    async fn get_children(&self, session: SessionId, path: &str)
    -> CoordinationResult<Vec<String>>;

    /// Registers a persistent children watch on `path` for this session.
    async fn watch_children(&self, session: SessionId, path: &str) -> CoordinationResult<()>;

    async fn unwatch_children(&self, session: SessionId, path: &str) -> CoordinationResult<()>;
}
