// ============================================================================
// zookeeper-master
// ============================================================================

//! Leader-gated consumers on top of a ZooKeeper-style coordination service.
//!
//! Processes that consume from the same `zookeeper-master:<group>:<uri>`
//! endpoint join one group; only the current master runs the wrapped
//! consumer, and the next-oldest member takes over when it leaves.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use zookeeper_master::{
//!     Consumer, CoordinationConfig, EndpointRegistry, InMemoryEnsemble, MasterComponent,
//!     MasterConfig, processor_fn,
//! };
//!
//! # async fn run() -> zookeeper_master::Result<()> {
//! let ensemble = Arc::new(InMemoryEnsemble::new());
//! let component = MasterComponent::new(
//!     ensemble,
//!     MasterConfig::new(CoordinationConfig::new("localhost:2181")),
//!     Arc::new(EndpointRegistry::with_defaults()),
//! )?;
//!
//! let endpoint = component.create_endpoint("zookeeper-master:orders:timer:tick?period=500")?;
//! let consumer = endpoint.master_consumer(processor_fn(|exchange| async move {
//!     println!("{}", exchange.body);
//!     Ok(())
//! }))?;
//! consumer.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod coordination;
pub mod core;
pub mod group;
pub mod master;
pub mod routing;

// Re-export main types for convenience
pub use core::{ConsumerNodeState, CoordinationError, MasterError, NodeState, Result};

pub use connection::{
    ConnectionStatus, CoordinationConnection, CoordinationEvent,
    config::{CoordinationConfig, Credentials},
    retry::{ExponentialBackoff, RetryConfig, RetryForever, RetryOneTime, RetryPolicy},
};

pub use coordination::{CoordinationService, CreateMode, InMemoryEnsemble, SessionId};

pub use group::{Group, GroupEvent, GroupFactory, GroupLifecycle, GroupListener, GroupMember, ZooKeeperGroup};

pub use master::{
    ContainerIdFactory, DefaultContainerIdFactory, MasterComponent, MasterConfig, MasterConsumer,
    MasterEndpoint, MasterStatus, UuidContainerIdFactory,
};

pub use routing::{
    Consumer, Endpoint, EndpointRegistry, Exchange, Processor, Suspendable, TimerEndpoint,
    processor_fn,
};
