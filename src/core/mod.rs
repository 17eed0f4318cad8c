pub mod error;
pub mod node_state;

pub use error::{CoordinationError, MasterError, Result};
pub use node_state::{ConsumerNodeState, NodeState};
