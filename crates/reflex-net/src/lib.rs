pub mod ws_server;

use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;

/// One JSON payload fanned out to every connected dashboard.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub payload: JsonValue,
}

#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    pub id: u64,
    pub addr: String,
    pub connected_at: Instant,
}

struct EventHubInner {
    events_tx: broadcast::Sender<StreamEvent>,
    clients: Mutex<Vec<ClientSnapshot>>,
}

impl EventHubInner {
    fn new() -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        EventHubInner {
            events_tx,
            clients: Mutex::new(Vec::new()),
        }
    }
}

static HUB: Lazy<Arc<EventHubInner>> = Lazy::new(|| Arc::new(EventHubInner::new()));

pub fn publish_event(payload: JsonValue) {
    let _ = HUB.events_tx.send(StreamEvent { payload });
}

pub fn subscribe_events() -> broadcast::Receiver<StreamEvent> {
    HUB.events_tx.subscribe()
}

pub(crate) fn register_client(snapshot: ClientSnapshot) {
    HUB.clients.lock().push(snapshot);
}

pub(crate) fn remove_client(id: u64) {
    HUB.clients.lock().retain(|client| client.id != id);
}

pub fn list_clients() -> Vec<ClientSnapshot> {
    HUB.clients.lock().clone()
}
