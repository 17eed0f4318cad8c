//! Minimal message-passing contracts the master consumer plugs into.
//!
//! An [`Endpoint`] creates [`Consumer`]s that feed [`Exchange`]s into a
//! [`Processor`]. Consumers that can pause without releasing resources expose
//! that through [`Consumer::as_suspendable`].

pub mod registry;
pub mod timer;

use crate::core::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

pub use registry::{EndpointFactory, EndpointRegistry, SharedEndpoint};
pub use timer::{TimerConsumer, TimerEndpoint};

/// A message travelling through a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub id: String,
    pub created: DateTime<Utc>,
    /// URI of the endpoint that produced the exchange
    pub from_endpoint: Option<String>,
    pub headers: BTreeMap<String, serde_json::Value>,
    pub body: serde_json::Value,
}

impl Exchange {
    pub fn new(body: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created: Utc::now(),
            from_endpoint: None,
            headers: BTreeMap::new(),
            body,
        }
    }

    pub fn from_endpoint(mut self, uri: impl Into<String>) -> Self {
        self.from_endpoint = Some(uri.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.headers.insert(name.into(), value);
        self
    }

    pub fn header(&self, name: &str) -> Option<&serde_json::Value> {
        self.headers.get(name)
    }
}

/// Receives exchanges from a consumer.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, exchange: Exchange) -> Result<()>;
}

struct FnProcessor<F>(F);

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(Exchange) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn process(&self, exchange: Exchange) -> Result<()> {
        (self.0)(exchange).await
    }
}

/// Wraps an async closure as a processor.
pub fn processor_fn<F, Fut>(f: F) -> Arc<dyn Processor>
where
    F: Fn(Exchange) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnProcessor(f))
}

/// Pause and resume without tearing a consumer down.
#[async_trait]
pub trait Suspendable: Send + Sync {
    async fn suspend(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
    fn is_suspended(&self) -> bool;
}

/// Source of exchanges for a processor.
#[async_trait]
pub trait Consumer: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Suspend/resume capability, if this consumer has one.
    fn as_suspendable(&self) -> Option<&dyn Suspendable> {
        None
    }
}

/// Addressable message source.
#[async_trait]
pub trait Endpoint: Send + Sync {
    fn endpoint_uri(&self) -> &str;

    fn create_consumer(&self, processor: Arc<dyn Processor>) -> Result<Box<dyn Consumer>>;

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Splits `scheme:rest?key=value&...` into its scheme, path and query pairs.
pub fn split_uri(uri: &str) -> Option<(&str, &str, Vec<(&str, &str)>)> {
    let (scheme, rest) = uri.split_once(':')?;
    if scheme.is_empty() {
        return None;
    }
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, query),
        None => (rest, ""),
    };
    let params = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .collect();
    Some((scheme, path.trim_start_matches("//"), params))
}
