use super::{Consumer, Endpoint, EndpointFactory, Exchange, Processor, Suspendable, split_uri};
use crate::core::{MasterError, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

const DEFAULT_PERIOD: Duration = Duration::from_millis(1000);

/// `timer:<name>?period=<millis>`: fires one exchange per period.
pub struct TimerEndpoint {
    uri: String,
    name: String,
    period: Duration,
}

impl TimerEndpoint {
    pub fn from_uri(uri: &str) -> Result<Self> {
        let (scheme, name, params) = split_uri(uri)
            .ok_or_else(|| MasterError::Configuration(format!("Invalid timer URI '{}'", uri)))?;
        if scheme != "timer" {
            return Err(MasterError::Configuration(format!(
                "'{}' is not a timer URI",
                uri
            )));
        }
        if name.is_empty() {
            return Err(MasterError::Configuration(format!(
                "Timer URI '{}' has no name",
                uri
            )));
        }

        let mut period = DEFAULT_PERIOD;
        for (key, value) in params {
            match key {
                "period" => {
                    let millis: u64 = value.parse().map_err(|_| {
                        MasterError::Configuration(format!("Invalid timer period '{}'", value))
                    })?;
                    if millis == 0 {
                        return Err(MasterError::Configuration(
                            "Timer period must be > 0".to_string(),
                        ));
                    }
                    period = Duration::from_millis(millis);
                }
                other => {
                    return Err(MasterError::Configuration(format!(
                        "Unknown timer option '{}'",
                        other
                    )));
                }
            }
        }

        Ok(Self {
            uri: uri.to_string(),
            name: name.to_string(),
            period,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

pub(crate) fn timer_factory() -> EndpointFactory {
    Arc::new(|uri: &str| -> Result<Arc<dyn Endpoint>> { Ok(Arc::new(TimerEndpoint::from_uri(uri)?)) })
}

#[async_trait]
impl Endpoint for TimerEndpoint {
    fn endpoint_uri(&self) -> &str {
        &self.uri
    }

    fn create_consumer(&self, processor: Arc<dyn Processor>) -> Result<Box<dyn Consumer>> {
        Ok(Box::new(TimerConsumer {
            uri: self.uri.clone(),
            name: self.name.clone(),
            period: self.period,
            processor,
            paused: Arc::new(AtomicBool::new(false)),
            fired: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }))
    }
}

/// Consumer behind a timer endpoint.
pub struct TimerConsumer {
    uri: String,
    name: String,
    period: Duration,
    processor: Arc<dyn Processor>,
    paused: Arc<AtomicBool>,
    fired: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TimerConsumer {
    /// Number of exchanges fired so far.
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Consumer for TimerConsumer {
    async fn start(&self) -> Result<()> {
        let mut task = self.task.lock()?;
        if task.is_some() {
            return Ok(());
        }

        let uri = self.uri.clone();
        let name = self.name.clone();
        let period = self.period;
        let processor = self.processor.clone();
        let paused = self.paused.clone();
        let fired = self.fired.clone();

        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if paused.load(Ordering::SeqCst) {
                    continue;
                }
                let counter = fired.fetch_add(1, Ordering::SeqCst) + 1;
                let exchange = Exchange::new(json!(counter))
                    .from_endpoint(uri.clone())
                    .with_header("timer.name", json!(name))
                    .with_header("timer.counter", json!(counter));
                if let Err(err) = processor.process(exchange).await {
                    warn!("Timer {} exchange {} failed: {}", name, counter, err);
                }
            }
        }));
        debug!("Timer consumer {} started", self.uri);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(task) = self.task.lock()?.take() {
            task.abort();
            debug!("Timer consumer {} stopped", self.uri);
        }
        Ok(())
    }

    fn as_suspendable(&self) -> Option<&dyn Suspendable> {
        Some(self)
    }
}

#[async_trait]
impl Suspendable for TimerConsumer {
    async fn suspend(&self) -> Result<()> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_suspended(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::processor_fn;

    #[test]
    fn test_parse_timer_uri() {
        let endpoint = TimerEndpoint::from_uri("timer:tick?period=250").unwrap();
        assert_eq!(endpoint.name(), "tick");
        assert_eq!(endpoint.period(), Duration::from_millis(250));

        let endpoint = TimerEndpoint::from_uri("timer://tick").unwrap();
        assert_eq!(endpoint.period(), DEFAULT_PERIOD);
    }

    #[test]
    fn test_invalid_timer_uris() {
        assert!(TimerEndpoint::from_uri("timer:").is_err());
        assert!(TimerEndpoint::from_uri("timer:tick?period=0").is_err());
        assert!(TimerEndpoint::from_uri("timer:tick?period=abc").is_err());
        assert!(TimerEndpoint::from_uri("timer:tick?color=red").is_err());
        assert!(TimerEndpoint::from_uri("seda:tick").is_err());
    }

    #[tokio::test]
    async fn test_timer_fires_and_pauses() {
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        let processor = processor_fn(move |_exchange| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let endpoint = TimerEndpoint::from_uri("timer:tick?period=10").unwrap();
        let consumer = endpoint.create_consumer(processor).unwrap();
        consumer.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(seen.load(Ordering::SeqCst) > 0);

        let suspendable = consumer.as_suspendable().unwrap();
        suspendable.suspend().await.unwrap();
        assert!(suspendable.is_suspended());
        // Let an in-flight tick drain before sampling.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let paused_at = seen.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), paused_at);

        consumer.stop().await.unwrap();
    }
}
