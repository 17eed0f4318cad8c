use super::container::{ContainerIdFactory, DefaultContainerIdFactory};
use super::endpoint::MasterEndpoint;
use crate::connection::config::CoordinationConfig;
use crate::connection::retry::RetryConfig;
use crate::coordination::{CoordinationService, join_path, validate_path};
use crate::core::{MasterError, Result};
use crate::group::GroupFactory;
use crate::routing::EndpointRegistry;
use log::info;
use std::sync::Arc;

/// URI scheme handled by [`MasterComponent`].
pub const MASTER_SCHEME: &str = "zookeeper-master";

/// Root under which every master group lives.
pub const DEFAULT_ZK_ROOT: &str = "/camel/zookeepermaster/clusters/master";

/// Component-level configuration
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Parent path of all groups created by this component
    pub zk_root: String,

    /// Connection shared by every endpoint of the component
    pub coordination: CoordinationConfig,

    pub container_id_factory: Arc<dyn ContainerIdFactory>,

    /// Backoff between failed promotion attempts
    pub promotion_retry: RetryConfig,
}

impl MasterConfig {
    pub fn new(coordination: CoordinationConfig) -> Self {
        Self {
            zk_root: DEFAULT_ZK_ROOT.to_string(),
            coordination,
            container_id_factory: Arc::new(DefaultContainerIdFactory),
            promotion_retry: RetryConfig::Exponential {
                initial_ms: 500,
                max_ms: 30_000,
                multiplier: 2.0,
                max_attempts: Some(10),
            },
        }
    }

    pub fn zk_root(mut self, root: &str) -> Self {
        self.zk_root = root.to_string();
        self
    }

    pub fn container_id_factory(mut self, factory: Arc<dyn ContainerIdFactory>) -> Self {
        self.container_id_factory = factory;
        self
    }

    pub fn promotion_retry(mut self, retry: RetryConfig) -> Self {
        self.promotion_retry = retry;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.zk_root.trim().is_empty() {
            return Err("zk_root must not be empty".to_string());
        }
        validate_path(&self.zk_root)?;
        self.coordination.validate()?;
        self.promotion_retry.validate()
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self::new(CoordinationConfig::default())
    }
}

/// Splits `zookeeper-master:<group>:<consumerUri>` into group name and
/// consumer URI.
pub fn parse_master_uri(uri: &str) -> Result<(String, String)> {
    let remaining = uri
        .strip_prefix(MASTER_SCHEME)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(uri);
    let remaining = remaining.trim_start_matches("//");

    let (group, child) = remaining.split_once(':').ok_or_else(|| {
        MasterError::Configuration(format!(
            "Wrong URI syntax '{}': expected {}:<groupName>:<consumerUri>",
            uri, MASTER_SCHEME
        ))
    })?;
    let group = group.trim();
    let child = child.trim();
    if group.is_empty() {
        return Err(MasterError::Configuration(format!(
            "Missing group name in '{}'",
            uri
        )));
    }
    if group.contains('/') {
        return Err(MasterError::Configuration(format!(
            "Group name '{}' must not contain '/'",
            group
        )));
    }
    if child.is_empty() {
        return Err(MasterError::Configuration(format!(
            "Missing consumer URI in '{}'",
            uri
        )));
    }
    Ok((group.to_string(), child.to_string()))
}

/// Coordination path of a group under `root`.
pub fn group_path(root: &str, group: &str) -> String {
    join_path(root, group)
}

/// Entry point for `zookeeper-master:` endpoints
///
/// Owns the coordination connection shared by all of its endpoints and
/// resolves the wrapped consumer URIs through an [`EndpointRegistry`].
#[derive(Clone)]
pub struct MasterComponent {
    config: Arc<MasterConfig>,
    groups: GroupFactory,
    registry: Arc<EndpointRegistry>,
}

impl MasterComponent {
    pub fn new(
        service: Arc<dyn CoordinationService>,
        config: MasterConfig,
        registry: Arc<EndpointRegistry>,
    ) -> Result<Self> {
        config.validate().map_err(MasterError::Configuration)?;
        let groups = GroupFactory::connect(service, config.coordination.clone())?;
        info!(
            "Master component using {} under {}",
            config.coordination.describe(),
            config.zk_root
        );
        Ok(Self {
            config: Arc::new(config),
            groups,
            registry,
        })
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn groups(&self) -> &GroupFactory {
        &self.groups
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn new_container_id(&self) -> String {
        self.config.container_id_factory.new_container_id()
    }

    /// Builds the endpoint for `uri`; the wrapped consumer URI must resolve.
    pub fn create_endpoint(&self, uri: &str) -> Result<MasterEndpoint> {
        let (group, child_uri) = parse_master_uri(uri)?;
        let path = group_path(&self.config.zk_root, &group);
        validate_path(&path).map_err(MasterError::Configuration)?;
        let child = self.registry.resolve(&child_uri)?;
        Ok(MasterEndpoint::new(
            self.clone(),
            uri.to_string(),
            group,
            path,
            child,
        ))
    }

    /// Closes the shared coordination connection.
    pub async fn stop(&self) -> Result<()> {
        self.groups.close().await
    }
}
