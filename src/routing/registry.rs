use super::{Consumer, Endpoint, Processor, split_uri};
use crate::core::{MasterError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Builds an endpoint from its full URI.
pub type EndpointFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn Endpoint>> + Send + Sync>;

/// Resolves endpoint URIs to endpoint instances.
///
/// Explicitly registered endpoints win; otherwise the factory registered for
/// the URI scheme builds one, and the result is cached per URI. Every user of
/// a URI gets the same [`SharedEndpoint`].
#[derive(Default)]
pub struct EndpointRegistry {
    factories: RwLock<HashMap<String, EndpointFactory>>,
    endpoints: RwLock<HashMap<String, Arc<dyn Endpoint>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `timer` scheme.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register_scheme("timer", super::timer::timer_factory());
        registry
    }

    pub fn register_scheme(&self, scheme: &str, factory: EndpointFactory) {
        self.factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(scheme.to_string(), factory);
    }

    /// Registers a ready-made endpoint under its own URI.
    pub fn register_endpoint(&self, endpoint: Arc<dyn Endpoint>) {
        self.endpoints
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(endpoint.endpoint_uri().to_string(), SharedEndpoint::wrap(endpoint));
    }

    pub fn resolve(&self, uri: &str) -> Result<Arc<dyn Endpoint>> {
        if let Some(endpoint) = self.endpoints.read()?.get(uri) {
            return Ok(endpoint.clone());
        }

        let (scheme, _, _) = split_uri(uri).ok_or_else(|| {
            MasterError::Configuration(format!("Endpoint URI '{}' has no scheme", uri))
        })?;
        let factory = self.factories.read()?.get(scheme).cloned().ok_or_else(|| {
            MasterError::Configuration(format!(
                "No endpoint factory registered for scheme '{}' (uri '{}')",
                scheme, uri
            ))
        })?;

        let endpoint = SharedEndpoint::wrap(factory(uri)?);
        let mut endpoints = self.endpoints.write()?;
        Ok(endpoints
            .entry(uri.to_string())
            .or_insert(endpoint)
            .clone())
    }
}

/// Endpoint handed out to several users.
///
/// Starts and stops are counted: the wrapped endpoint starts with its first
/// user and stops when the last one stops it.
pub struct SharedEndpoint {
    inner: Arc<dyn Endpoint>,
    users: tokio::sync::Mutex<usize>,
}

impl SharedEndpoint {
    fn wrap(inner: Arc<dyn Endpoint>) -> Arc<dyn Endpoint> {
        Arc::new(Self {
            inner,
            users: tokio::sync::Mutex::new(0),
        })
    }
}

#[async_trait]
impl Endpoint for SharedEndpoint {
    fn endpoint_uri(&self) -> &str {
        self.inner.endpoint_uri()
    }

    fn create_consumer(&self, processor: Arc<dyn Processor>) -> Result<Box<dyn Consumer>> {
        self.inner.create_consumer(processor)
    }

    async fn start(&self) -> Result<()> {
        let mut users = self.users.lock().await;
        if *users == 0 {
            self.inner.start().await?;
        }
        *users += 1;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut users = self.users.lock().await;
        match *users {
            0 => Ok(()),
            1 => {
                *users = 0;
                self.inner.stop().await
            }
            _ => {
                *users -= 1;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingEndpoint {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl Endpoint for CountingEndpoint {
        fn endpoint_uri(&self) -> &str {
            "counting:work"
        }

        fn create_consumer(&self, _processor: Arc<dyn Processor>) -> Result<Box<dyn Consumer>> {
            Err(MasterError::Consumer("no consumers".to_string()))
        }

        async fn start(&self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_shared_endpoint_stops_with_last_user() {
        let counting = Arc::new(CountingEndpoint::default());
        let registry = EndpointRegistry::new();
        registry.register_endpoint(counting.clone());

        let first = registry.resolve("counting:work").unwrap();
        let second = registry.resolve("counting:work").unwrap();
        first.start().await.unwrap();
        second.start().await.unwrap();
        assert_eq!(counting.starts.load(Ordering::SeqCst), 1);

        first.stop().await.unwrap();
        assert_eq!(counting.stops.load(Ordering::SeqCst), 0);
        second.stop().await.unwrap();
        assert_eq!(counting.stops.load(Ordering::SeqCst), 1);

        // Unpaired stops are ignored.
        second.stop().await.unwrap();
        assert_eq!(counting.stops.load(Ordering::SeqCst), 1);

        first.start().await.unwrap();
        assert_eq!(counting.starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_resolve_caches_per_uri() {
        let registry = EndpointRegistry::with_defaults();
        let first = registry.resolve("timer:tick?period=50").unwrap();
        let second = registry.resolve("timer:tick?period=50").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.endpoint_uri(), "timer:tick?period=50");
    }

    #[test]
    fn test_unknown_scheme_is_configuration_error() {
        let registry = EndpointRegistry::new();
        let err = registry.resolve("jms:queue:orders").err().unwrap();
        assert!(matches!(err, MasterError::Configuration(_)));

        let err = registry.resolve("no-scheme").err().unwrap();
        assert!(matches!(err, MasterError::Configuration(_)));
    }
}
