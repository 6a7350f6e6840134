//! Topic registry and event dispatcher.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use pan_bagnat_common::types::Event;

/// Capacity of the shared event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 10_000;
/// Per-connection frame buffer.
const CONN_BUFFER: usize = 64;
/// A frame that cannot be handed to a connection within this deadline is
/// dropped; the connection is kept.
const WRITE_DEADLINE: Duration = Duration::from_secs(5);

pub type ConnId = u64;
type Hook = Box<dyn Fn(&str, usize) + Send + Sync>;

struct ConnEntry {
    tx: mpsc::Sender<String>,
    topics: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    conns: HashMap<ConnId, ConnEntry>,
    /// Subscriber count per topic, drives the refcount hooks.
    counts: HashMap<String, usize>,
    on_subscribe: Option<Hook>,
    on_unsubscribe: Option<Hook>,
}

pub struct WsRegistry {
    inner: Mutex<Inner>,
    next_conn_id: AtomicU64,
    event_tx: mpsc::Sender<Event>,
}

impl WsRegistry {
    /// Build the registry plus the receiving half of the shared event
    /// channel (handed to [`spawn_dispatcher`]).
    pub fn new() -> (Arc<Self>, mpsc::Receiver<Event>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let registry = Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            next_conn_id: AtomicU64::new(1),
            event_tx,
        });
        (registry, event_rx)
    }

    /// Producer handle onto the shared event channel.
    pub fn event_sender(&self) -> mpsc::Sender<Event> {
        self.event_tx.clone()
    }

    /// Push an event, shedding it with a WARN when the channel is full.
    /// Producers are never blocked by slow consumers.
    pub fn push(&self, event: Event) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("event channel full, dropping event: {e}");
        }
    }

    /// Install the refcount hooks. Invoked under the registry lock.
    pub fn set_hooks(
        &self,
        on_subscribe: impl Fn(&str, usize) + Send + Sync + 'static,
        on_unsubscribe: impl Fn(&str, usize) + Send + Sync + 'static,
    ) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.on_subscribe = Some(Box::new(on_subscribe));
        inner.on_unsubscribe = Some(Box::new(on_unsubscribe));
    }

    pub fn register(&self, tx: mpsc::Sender<String>) -> ConnId {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.conns.insert(
            id,
            ConnEntry {
                tx,
                topics: HashSet::new(),
            },
        );
        debug!(conn = id, "websocket registered");
        id
    }

    /// Drop a connection and fire the unsubscribe hook for every topic it
    /// still held.
    pub fn unregister(&self, conn_id: ConnId) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let Some(entry) = inner.conns.remove(&conn_id) else {
            return;
        };
        for topic in entry.topics {
            decrement(&mut inner, &topic);
        }
        debug!(conn = conn_id, "websocket unregistered");
    }

    pub fn subscribe(&self, conn_id: ConnId, topic: &str) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let Some(entry) = inner.conns.get_mut(&conn_id) else {
            return;
        };
        if !entry.topics.insert(topic.to_string()) {
            return; // already subscribed
        }
        let count = {
            let count = inner.counts.entry(topic.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if let Some(hook) = &inner.on_subscribe {
            hook(topic, count);
        }
    }

    pub fn unsubscribe(&self, conn_id: ConnId, topic: &str) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let Some(entry) = inner.conns.get_mut(&conn_id) else {
            return;
        };
        if !entry.topics.remove(topic) {
            return;
        }
        decrement(&mut inner, topic);
    }

    /// Current subscriber count of a topic.
    pub fn topic_count(&self, topic: &str) -> usize {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.counts.get(topic).copied().unwrap_or(0)
    }

    /// Fan one event out to its topic's subscribers (empty topic =
    /// broadcast). The frame is serialized once; each hand-off carries the
    /// write deadline.
    pub async fn publish(&self, event: &Event) {
        let frame = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize event: {e}");
                return;
            }
        };
        let topic = event.topic.as_deref().unwrap_or("");
        let targets: Vec<mpsc::Sender<String>> = {
            let inner = self.inner.lock().expect("registry lock poisoned");
            inner
                .conns
                .values()
                .filter(|entry| topic.is_empty() || entry.topics.contains(topic))
                .map(|entry| entry.tx.clone())
                .collect()
        };
        for tx in targets {
            match tokio::time::timeout(WRITE_DEADLINE, tx.send(frame.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {} // connection gone, reader loop will unregister
                Err(_) => warn!(topic, "slow websocket client, frame dropped"),
            }
        }
    }
}

fn decrement(inner: &mut Inner, topic: &str) {
    let count = match inner.counts.get_mut(topic) {
        Some(count) => {
            *count = count.saturating_sub(1);
            *count
        }
        None => 0,
    };
    if count == 0 {
        inner.counts.remove(topic);
    }
    if let Some(hook) = &inner.on_unsubscribe {
        hook(topic, count);
    }
}

/// Run the dispatcher: drain the shared channel and fan out.
pub fn spawn_dispatcher(registry: Arc<WsRegistry>, mut rx: mpsc::Receiver<Event>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            registry.publish(&event).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn conn(registry: &WsRegistry, buffer: usize) -> (ConnId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer);
        (registry.register(tx), rx)
    }

    #[tokio::test]
    async fn test_topic_refcount_single_stop() {
        let (registry, _rx) = WsRegistry::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        {
            let starts = starts.clone();
            let stops = stops.clone();
            registry.set_hooks(
                move |_, count| {
                    if count == 1 {
                        starts.fetch_add(1, Ordering::SeqCst);
                    }
                },
                move |_, count| {
                    if count == 0 {
                        stops.fetch_add(1, Ordering::SeqCst);
                    }
                },
            );
        }

        let (a, _rx_a) = conn(&registry, 4);
        let (b, _rx_b) = conn(&registry, 4);
        let topic = "container:module_1:backend";

        registry.subscribe(a, topic);
        registry.subscribe(b, topic);
        assert_eq!(starts.load(Ordering::SeqCst), 1, "tail started once");

        registry.unsubscribe(a, topic);
        assert_eq!(stops.load(Ordering::SeqCst), 0, "one subscriber remains");

        registry.unsubscribe(b, topic);
        assert_eq!(stops.load(Ordering::SeqCst), 1, "tail stopped exactly once");
        assert_eq!(registry.topic_count(topic), 0);
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_counts_once() {
        let (registry, _rx) = WsRegistry::new();
        let (a, _rx_a) = conn(&registry, 4);
        registry.subscribe(a, "module:m1");
        registry.subscribe(a, "module:m1");
        assert_eq!(registry.topic_count("module:m1"), 1);
    }

    #[tokio::test]
    async fn test_unregister_fires_unsubscribe_for_all_topics() {
        let (registry, _rx) = WsRegistry::new();
        let zeroed = Arc::new(AtomicUsize::new(0));
        {
            let zeroed = zeroed.clone();
            registry.set_hooks(
                |_, _| {},
                move |_, count| {
                    if count == 0 {
                        zeroed.fetch_add(1, Ordering::SeqCst);
                    }
                },
            );
        }
        let (a, _rx_a) = conn(&registry, 4);
        registry.subscribe(a, "module:m1");
        registry.subscribe(a, "container:m1:web");
        registry.unregister(a);
        assert_eq!(zeroed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_publish_routes_by_topic() {
        let (registry, _rx) = WsRegistry::new();
        let (a, mut rx_a) = conn(&registry, 4);
        let (_b, mut rx_b) = conn(&registry, 4);
        registry.subscribe(a, "module:m1");

        let event = Event::new(
            "module_log",
            Some("module:m1".to_string()),
            serde_json::json!({"line": 1}),
        );
        registry.publish(&event).await;

        let frame = rx_a.try_recv().expect("subscriber receives the frame");
        assert!(frame.contains("module_log"));
        assert!(rx_b.try_recv().is_err(), "non-subscriber receives nothing");
    }

    #[tokio::test]
    async fn test_publish_empty_topic_broadcasts() {
        let (registry, _rx) = WsRegistry::new();
        let (_a, mut rx_a) = conn(&registry, 4);
        let (_b, mut rx_b) = conn(&registry, 4);

        let event = Event::new("module_status_changed", None, serde_json::json!({}));
        registry.publish(&event).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_client_frame_dropped_connection_kept() {
        let (registry, _rx) = WsRegistry::new();
        let (a, mut rx_a) = conn(&registry, 1);
        registry.subscribe(a, "module:m1");

        // Fill the connection buffer, then publish into a full buffer.
        let event = Event::new(
            "module_log",
            Some("module:m1".to_string()),
            serde_json::json!({}),
        );
        registry.publish(&event).await;
        registry.publish(&event).await; // exceeds the deadline under paused time

        assert!(rx_a.try_recv().is_ok(), "first frame delivered");
        assert!(rx_a.try_recv().is_err(), "second frame was shed");
        assert_eq!(registry.topic_count("module:m1"), 1, "connection retained");
    }
}
