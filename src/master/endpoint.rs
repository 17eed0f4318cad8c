use super::component::MasterComponent;
use super::consumer::MasterConsumer;
use crate::core::{ConsumerNodeState, Result};
use crate::group::ZooKeeperGroup;
use crate::routing::{Consumer, Endpoint, Processor};
use async_trait::async_trait;
use std::sync::Arc;

struct EndpointInner {
    component: MasterComponent,
    uri: String,
    group_name: String,
    group_path: String,
    child: Arc<dyn Endpoint>,
}

/// Endpoint whose consumers only run on the current master of a group.
#[derive(Clone)]
pub struct MasterEndpoint {
    inner: Arc<EndpointInner>,
}

impl MasterEndpoint {
    pub(crate) fn new(
        component: MasterComponent,
        uri: String,
        group_name: String,
        group_path: String,
        child: Arc<dyn Endpoint>,
    ) -> Self {
        Self {
            inner: Arc::new(EndpointInner {
                component,
                uri,
                group_name,
                group_path,
                child,
            }),
        }
    }

    pub fn component(&self) -> &MasterComponent {
        &self.inner.component
    }

    pub fn group_name(&self) -> &str {
        &self.inner.group_name
    }

    pub fn group_path(&self) -> &str {
        &self.inner.group_path
    }

    /// The wrapped endpoint that only the master consumes from.
    pub fn child(&self) -> &Arc<dyn Endpoint> {
        &self.inner.child
    }

    pub fn child_uri(&self) -> &str {
        self.inner.child.endpoint_uri()
    }

    /// New, unstarted group on the component's shared connection.
    pub fn create_group(&self) -> Result<ZooKeeperGroup<ConsumerNodeState>> {
        self.inner
            .component
            .groups()
            .create_group(&self.inner.group_path)
    }

    /// Like [`Endpoint::create_consumer`] but keeps the concrete type.
    pub fn master_consumer(&self, processor: Arc<dyn Processor>) -> Result<MasterConsumer> {
        MasterConsumer::new(self.clone(), processor)
    }
}

#[async_trait]
impl Endpoint for MasterEndpoint {
    fn endpoint_uri(&self) -> &str {
        &self.inner.uri
    }

    fn create_consumer(&self, processor: Arc<dyn Processor>) -> Result<Box<dyn Consumer>> {
        Ok(Box::new(self.master_consumer(processor)?))
    }
}
