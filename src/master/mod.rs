//! `zookeeper-master:` endpoints
//!
//! A master endpoint wraps another endpoint so that only one process of a
//! cluster consumes from it at a time. Every consumer joins the group
//! `<zk_root>/<groupName>`; the member holding the oldest entry starts the
//! wrapped consumer, the others stand by until it leaves.
//!
//! ```text
//! zookeeper-master:<groupName>:<consumerUri>
//! ```

pub mod component;
pub mod consumer;
pub mod container;
pub mod endpoint;

pub use component::{
    DEFAULT_ZK_ROOT, MASTER_SCHEME, MasterComponent, MasterConfig, group_path, parse_master_uri,
};
pub use consumer::{MasterConsumer, MasterStatus};
pub use container::{ContainerIdFactory, DefaultContainerIdFactory, UuidContainerIdFactory};
pub use endpoint::MasterEndpoint;
