use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// State a cluster member publishes into its group entry.
///
/// Implementations are immutable snapshots: a member builds a new value for
/// every publish instead of mutating the one it handed to the group.
pub trait NodeState: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Identifier of the logical thing being protected (stable per endpoint).
    fn id(&self) -> &str;

    /// Identifier of the process or host that published this state.
    fn container(&self) -> Option<&str>;
}

/// Published state of a master-gated consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsumerNodeState {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer: Option<String>,
    #[serde(default)]
    pub started: bool,
}

impl ConsumerNodeState {
    pub fn new(id: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            container: Some(container.into()),
            consumer: None,
            started: false,
        }
    }

    pub fn with_consumer(mut self, uri: impl Into<String>) -> Self {
        self.consumer = Some(uri.into());
        self
    }

    pub fn with_started(mut self, started: bool) -> Self {
        self.started = started;
        self
    }
}

impl NodeState for ConsumerNodeState {
    fn id(&self) -> &str {
        &self.id
    }

    fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }
}
