//! In-memory transport for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{
    Acquired, ObservationStore, PlayerTransport, TransportEvent, TransportFactory, TransportOptions,
};
use crate::error::{IpcError, IpcResult};
use crate::runtime::TaskSpawner;

pub(crate) struct MockTransport {
    running: AtomicBool,
    start_calls: AtomicUsize,
    start_failures: Mutex<VecDeque<IpcError>>,
    sent: Mutex<Vec<Value>>,
    observe_calls: Mutex<Vec<String>>,
    unobserve_calls: Mutex<Vec<String>>,
    properties: Mutex<HashMap<String, Value>>,
    observations: ObservationStore,
    events: broadcast::Sender<TransportEvent>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            running: AtomicBool::new(false),
            start_calls: AtomicUsize::new(0),
            start_failures: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            observe_calls: Mutex::new(Vec::new()),
            unobserve_calls: Mutex::new(Vec::new()),
            properties: Mutex::new(HashMap::new()),
            observations: ObservationStore::new(),
            events,
        }
    }

    pub fn running() -> Self {
        let mock = Self::new();
        mock.running.store(true, Ordering::SeqCst);
        mock
    }

    /// Queues errors returned by the next `start()` calls, in order.
    pub fn fail_starts(&self, errors: impl IntoIterator<Item = IpcError>) {
        self.start_failures.lock().extend(errors);
    }

    pub fn set_property(&self, name: &str, value: Value) {
        self.properties.lock().insert(name.to_string(), value);
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_property(&self, name: &str, data: Value) {
        self.emit(TransportEvent::PropertyChange {
            name: name.to_string(),
            data,
        });
    }

    /// Simulates the process dying underneath the transport.
    pub fn crash(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.observations.clear();
        self.emit(TransportEvent::Crashed);
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    /// Commands whose first element is `name`.
    pub fn sent_named(&self, name: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|c| command_name(c) == Some(name))
            .cloned()
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    pub fn observe_calls(&self) -> Vec<String> {
        self.observe_calls.lock().clone()
    }

    pub fn unobserve_calls(&self) -> Vec<String> {
        self.unobserve_calls.lock().clone()
    }
}

fn command_name(command: &Value) -> Option<&str> {
    match command {
        Value::Array(items) => items.first().and_then(Value::as_str),
        Value::Object(map) => map.get("name").and_then(Value::as_str),
        _ => None,
    }
}

#[async_trait]
impl PlayerTransport for MockTransport {
    async fn start(&self) -> IpcResult<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.running.load(Ordering::SeqCst) {
            return Err(IpcError::AlreadyRunning);
        }
        if let Some(err) = self.start_failures.lock().pop_front() {
            return Err(err);
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> IpcResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(IpcError::NotRunning);
        }
        self.sent.lock().push(serde_json::json!(["quit"]));
        self.observations.clear();
        self.emit(TransportEvent::Stopped);
        Ok(())
    }

    async fn send(&self, command: Value) -> IpcResult<Value> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(IpcError::NotRunning);
        }
        let reply = match command_name(&command) {
            Some("get_property") => command
                .get(1)
                .and_then(Value::as_str)
                .and_then(|name| self.properties.lock().get(name).cloned())
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };
        self.sent.lock().push(command);
        Ok(reply)
    }

    async fn observe_property(&self, name: &str) -> IpcResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(IpcError::NotRunning);
        }
        self.observe_calls.lock().push(name.to_string());
        if let Acquired::First(id) = self.observations.acquire(name) {
            self.observations.confirm(name, id);
        }
        Ok(())
    }

    async fn unobserve_property(&self, name: &str) -> IpcResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(IpcError::NotRunning);
        }
        self.unobserve_calls.lock().push(name.to_string());
        self.observations.release(name).map(|_| ())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

/// Hands out fresh mock transports and remembers them.
#[derive(Default)]
pub(crate) struct MockTransportFactory {
    prepared: Mutex<VecDeque<Arc<MockTransport>>>,
    created: Mutex<Vec<(TransportOptions, Arc<MockTransport>)>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a preconfigured transport for the next `create()`.
    pub fn prepare(&self, transport: MockTransport) -> Arc<MockTransport> {
        let transport = Arc::new(transport);
        self.prepared.lock().push_back(Arc::clone(&transport));
        transport
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn latest(&self) -> Arc<MockTransport> {
        let created = self.created.lock();
        let (_, transport) = created.last().expect("no transport created");
        Arc::clone(transport)
    }

    pub fn latest_options(&self) -> TransportOptions {
        let created = self.created.lock();
        let (options, _) = created.last().expect("no transport created");
        options.clone()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(
        &self,
        options: TransportOptions,
        _spawner: Arc<dyn TaskSpawner>,
    ) -> Arc<dyn PlayerTransport> {
        let transport = self
            .prepared
            .lock()
            .pop_front()
            .unwrap_or_else(|| Arc::new(MockTransport::new()));
        self.created.lock().push((options, Arc::clone(&transport)));
        transport
    }
}
