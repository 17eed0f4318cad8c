#![allow(dead_code)]

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use zookeeper_master::{
    Consumer, ConsumerNodeState, ContainerIdFactory, CoordinationConfig, Endpoint,
    EndpointRegistry, Group, GroupEvent, GroupLifecycle, GroupListener, GroupMember,
    InMemoryEnsemble, MasterComponent, MasterConfig, MasterConsumer, MasterError, Processor,
    Result, RetryConfig, Suspendable, ZooKeeperGroup, processor_fn,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Like [`wait_until`] for conditions that need to await.
pub async fn wait_until_async<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn test_config() -> CoordinationConfig {
    CoordinationConfig::default()
        .connection_timeout(Duration::from_secs(2))
        .retry(RetryConfig::Forever { delay_ms: 20 })
}

/// Ordered record of what the mock consumers did, shared across members.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

#[derive(Default)]
pub struct Counters {
    pub endpoint_started: AtomicUsize,
    pub endpoint_stopped: AtomicUsize,
    pub created: AtomicUsize,
    pub start_attempts: AtomicUsize,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub suspended: AtomicUsize,
    pub resumed: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Endpoint whose consumers only count what happens to them.
pub struct MockEndpoint {
    uri: String,
    name: String,
    log: EventLog,
    pub counters: Arc<Counters>,
    failing_starts: Arc<AtomicUsize>,
    suspendable: bool,
}

impl MockEndpoint {
    pub fn new(uri: &str, name: &str, log: EventLog) -> Self {
        Self {
            uri: uri.to_string(),
            name: name.to_string(),
            log,
            counters: Arc::new(Counters::default()),
            failing_starts: Arc::new(AtomicUsize::new(0)),
            suspendable: false,
        }
    }

    /// The next `count` consumer starts fail.
    pub fn failing_starts(self, count: usize) -> Self {
        self.failing_starts.store(count, Ordering::SeqCst);
        self
    }

    pub fn suspendable(mut self) -> Self {
        self.suspendable = true;
        self
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    fn endpoint_uri(&self) -> &str {
        &self.uri
    }

    fn create_consumer(&self, _processor: Arc<dyn Processor>) -> Result<Box<dyn Consumer>> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("{}:create", self.name));
        Ok(Box::new(MockConsumer {
            name: self.name.clone(),
            log: self.log.clone(),
            counters: self.counters.clone(),
            failing_starts: self.failing_starts.clone(),
            suspendable: self.suspendable,
            paused: Mutex::new(false),
        }))
    }

    async fn start(&self) -> Result<()> {
        self.counters.endpoint_started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.counters.endpoint_stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockConsumer {
    name: String,
    log: EventLog,
    counters: Arc<Counters>,
    failing_starts: Arc<AtomicUsize>,
    suspendable: bool,
    paused: Mutex<bool>,
}

#[async_trait]
impl Consumer for MockConsumer {
    async fn start(&self) -> Result<()> {
        self.counters.start_attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failing_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            self.log.push(format!("{}:start-failed", self.name));
            return Err(MasterError::Consumer(format!("{} refused to start", self.name)));
        }
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("{}:start", self.name));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("{}:stop", self.name));
        Ok(())
    }

    fn as_suspendable(&self) -> Option<&dyn Suspendable> {
        if self.suspendable { Some(self) } else { None }
    }
}

#[async_trait]
impl Suspendable for MockConsumer {
    async fn suspend(&self) -> Result<()> {
        self.counters.suspended.fetch_add(1, Ordering::SeqCst);
        *self.paused.lock().unwrap() = true;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.counters.resumed.fetch_add(1, Ordering::SeqCst);
        *self.paused.lock().unwrap() = false;
        Ok(())
    }

    fn is_suspended(&self) -> bool {
        *self.paused.lock().unwrap()
    }
}

#[derive(Debug)]
pub struct NamedContainer(pub String);

impl ContainerIdFactory for NamedContainer {
    fn new_container_id(&self) -> String {
        self.0.clone()
    }
}

/// One simulated process: its own component, connection and consumer.
pub struct Member {
    pub name: String,
    pub component: MasterComponent,
    pub consumer: MasterConsumer,
    pub counters: Arc<Counters>,
}

impl Member {
    pub fn session(&self) -> Option<u64> {
        self.component.groups().connection().session_id()
    }

    pub fn running(&self) -> bool {
        self.consumer.status().delegate_running
    }
}

pub fn component(
    ensemble: &Arc<InMemoryEnsemble>,
    name: &str,
    zk_root: &str,
    endpoint: Arc<dyn Endpoint>,
    promotion_retry: RetryConfig,
) -> MasterComponent {
    let registry = Arc::new(EndpointRegistry::new());
    registry.register_endpoint(endpoint);
    let config = MasterConfig::new(test_config())
        .zk_root(zk_root)
        .container_id_factory(Arc::new(NamedContainer(name.to_string())))
        .promotion_retry(promotion_retry);
    MasterComponent::new(ensemble.clone(), config, registry).unwrap()
}

/// Builds a member guarding `mock:work` in group `master` under `zk_root`.
pub fn member(
    ensemble: &Arc<InMemoryEnsemble>,
    name: &str,
    zk_root: &str,
    endpoint: MockEndpoint,
) -> Member {
    let counters = endpoint.counters.clone();
    let component = component(
        ensemble,
        name,
        zk_root,
        Arc::new(endpoint),
        RetryConfig::Forever { delay_ms: 30 },
    );
    let endpoint = component
        .create_endpoint("zookeeper-master:master:mock:work")
        .unwrap();
    let consumer = endpoint.master_consumer(noop_processor()).unwrap();
    Member {
        name: name.to_string(),
        component,
        consumer,
        counters,
    }
}

pub fn noop_processor() -> Arc<dyn Processor> {
    processor_fn(|_exchange| async { Ok(()) })
}

/// Records group events as listeners see them.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<GroupEvent>>,
}

impl EventRecorder {
    pub fn events(&self) -> Vec<GroupEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: GroupEvent) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }
}

#[async_trait]
impl GroupListener<ConsumerNodeState> for EventRecorder {
    async fn group_event(&self, _group: &dyn Group<ConsumerNodeState>, event: GroupEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Group wrapper that records every published state and can replay events.
pub struct RecordingGroup {
    inner: ZooKeeperGroup<ConsumerNodeState>,
    updates: Mutex<Vec<ConsumerNodeState>>,
    listeners: Mutex<Vec<Arc<dyn GroupListener<ConsumerNodeState>>>>,
}

impl RecordingGroup {
    pub fn new(inner: ZooKeeperGroup<ConsumerNodeState>) -> Self {
        Self {
            inner,
            updates: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn updates(&self) -> Vec<ConsumerNodeState> {
        self.updates.lock().unwrap().clone()
    }

    pub fn started_flags(&self) -> Vec<bool> {
        self.updates().iter().map(|state| state.started).collect()
    }

    /// Delivers `event` to every registered listener, as the group would.
    pub async fn fire(&self, event: GroupEvent) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener.group_event(self, event).await;
        }
    }
}

#[async_trait]
impl Group<ConsumerNodeState> for RecordingGroup {
    fn path(&self) -> &str {
        self.inner.path()
    }

    async fn start(&self) -> Result<()> {
        self.inner.start().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn lifecycle(&self) -> GroupLifecycle {
        self.inner.lifecycle()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn is_master(&self) -> bool {
        self.inner.is_master()
    }

    async fn update(&self, state: ConsumerNodeState) -> Result<()> {
        self.updates.lock().unwrap().push(state.clone());
        self.inner.update(state).await
    }

    fn add(&self, listener: Arc<dyn GroupListener<ConsumerNodeState>>) {
        self.listeners.lock().unwrap().push(listener.clone());
        self.inner.add(listener);
    }

    fn remove(&self, listener: &Arc<dyn GroupListener<ConsumerNodeState>>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|registered| !Arc::ptr_eq(registered, listener));
        self.inner.remove(listener);
    }

    fn roster(&self) -> Vec<GroupMember<ConsumerNodeState>> {
        self.inner.roster()
    }

    fn last_state(&self) -> Option<ConsumerNodeState> {
        self.inner.last_state()
    }
}
