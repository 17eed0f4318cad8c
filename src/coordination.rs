use crate::connection::config::Credentials;
use crate::core::CoordinationError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

// Coordination client boundary and its in-process ensemble, split by concern.
include!("coordination/service.rs");
include!("coordination/paths.rs");
include!("coordination/in_memory.rs");
