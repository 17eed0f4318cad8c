use super::ZooKeeperGroup;
use crate::connection::CoordinationConnection;
use crate::connection::config::CoordinationConfig;
use crate::coordination::CoordinationService;
use crate::core::{NodeState, Result};
use std::sync::Arc;

/// Creates groups that share one coordination connection.
#[derive(Clone)]
pub struct GroupFactory {
    connection: Arc<CoordinationConnection>,
}

impl GroupFactory {
    pub fn new(connection: Arc<CoordinationConnection>) -> Self {
        Self { connection }
    }

    /// Builds a factory with its own connection to `service`.
    pub fn connect(service: Arc<dyn CoordinationService>, config: CoordinationConfig) -> Result<Self> {
        let connection = CoordinationConnection::new(service, config)?;
        Ok(Self::new(Arc::new(connection)))
    }

    /// Creates a group bound to `path`. The group is not started.
    pub fn create_group<T: NodeState>(&self, path: &str) -> Result<ZooKeeperGroup<T>> {
        ZooKeeperGroup::new(self.connection.clone(), path)
    }

    pub fn connection(&self) -> &Arc<CoordinationConnection> {
        &self.connection
    }

    /// Closes the shared connection; groups created from it stop receiving events.
    pub async fn close(&self) -> Result<()> {
        self.connection.close().await
    }
}
