//! Coordination-backed membership groups
//!
//! A group is a named roster of live members under one coordination path.
//! Each member publishes a [`NodeState`] into an ephemeral sequential entry;
//! the member whose entry has the lowest sequence number is the master.
//!
//! ## Events
//! - **`Connected`**: a session was (re)established.
//! - **`Changed`**: the roster or a member's state changed while connected.
//!   Listeners must re-check [`Group::is_master`].
//! - **`Disconnected`**: the session link is down. Any mastership held so far
//!   must be treated as revoked.

pub mod factory;
pub mod zookeeper;

use crate::core::{NodeState, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub use factory::GroupFactory;
pub use zookeeper::ZooKeeperGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupEvent {
    Connected,
    Changed,
    Disconnected,
}

impl fmt::Display for GroupEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connected => "CONNECTED",
            Self::Changed => "CHANGED",
            Self::Disconnected => "DISCONNECTED",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a group instance.
///
/// `Closed` is terminal: no events fire after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupLifecycle {
    Created,
    Starting,
    Connected,
    Disconnected,
    Closed,
}

/// One live entry of the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember<T> {
    /// Entry name under the group path.
    pub name: String,
    pub sequence: u64,
    /// Decoded state; `None` if the entry content could not be decoded.
    pub state: Option<T>,
}

/// Callback for group events.
///
/// Invoked serially from the group's event task, never concurrently for the
/// same group. Implementations must tolerate redundant `Changed` events.
#[async_trait]
pub trait GroupListener<T: NodeState>: Send + Sync {
    async fn group_event(&self, group: &dyn Group<T>, event: GroupEvent);
}

/// A named membership roster with single-master election.
#[async_trait]
pub trait Group<T: NodeState>: Send + Sync {
    /// Coordination path of the roster.
    fn path(&self) -> &str;

    /// Connects (or reuses the shared connection) and starts watching.
    ///
    /// Connectivity problems are not reported here; the group keeps trying
    /// and emits `Connected` once it succeeds.
    async fn start(&self) -> Result<()>;

    /// Removes this member's entry and stops watching. Terminal.
    async fn close(&self) -> Result<()>;

    fn lifecycle(&self) -> GroupLifecycle;

    fn is_connected(&self) -> bool;

    /// True iff connected and this member's entry has the lowest sequence.
    fn is_master(&self) -> bool;

    /// Publishes `state` as this member's entry content.
    ///
    /// Before the group is connected the state is remembered and written as
    /// soon as a session is available.
    async fn update(&self, state: T) -> Result<()>;

    fn add(&self, listener: Arc<dyn GroupListener<T>>);

    fn remove(&self, listener: &Arc<dyn GroupListener<T>>);

    /// Live entries ordered by sequence (oldest first).
    fn roster(&self) -> Vec<GroupMember<T>>;

    /// Decoded member states ordered by sequence.
    fn members(&self) -> Vec<T> {
        self.roster()
            .into_iter()
            .filter_map(|member| member.state)
            .collect()
    }

    /// State of the current master as last observed.
    fn master(&self) -> Option<T> {
        self.roster()
            .into_iter()
            .next()
            .and_then(|member| member.state)
    }

    /// States of every member except the master.
    fn slaves(&self) -> Vec<T> {
        self.roster()
            .into_iter()
            .skip(1)
            .filter_map(|member| member.state)
            .collect()
    }

    /// Last state passed to `update()`.
    fn last_state(&self) -> Option<T>;
}

/// Compares listeners by identity.
pub(crate) fn same_listener<T: NodeState>(
    a: &Arc<dyn GroupListener<T>>,
    b: &Arc<dyn GroupListener<T>>,
) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
