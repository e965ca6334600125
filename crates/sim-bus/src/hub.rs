//! Subscriber Hub: network fan-out to downstream clients, each with a
//! bounded outgoing queue and slow-consumer eviction. Keep-alive state
//! (30s ping cadence, 60s pong timeout) is tracked here; the transport
//! loop (websocket ping/pong frames) lives in the HTTP Surface.

use dashmap::DashMap;
use parking_lot::RwLock;
use sim_types::EngineEvent;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-client outgoing queue capacity. Enqueueing past this evicts the
/// connection ("slow-consumer eviction") rather than blocking the
/// broadcaster.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

/// Pong timeout: a connection silent for this long after its last pong is
/// considered dead and removed.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Inbound client protocol. Any frame that does not parse into one of
/// these is dropped silently by the caller before reaching the Hub.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { strategy_id: Option<Uuid> },
    Unsubscribe { strategy_id: Option<Uuid> },
    Ping,
}

struct ClientState {
    sender: mpsc::Sender<EngineEvent>,
    /// `None` means broadcast-all (the default); `Some(set)` filters to
    /// those strategy ids.
    subscriptions: RwLock<Option<HashSet<Uuid>>>,
    last_pong: RwLock<Instant>,
}

/// A handle returned on registration; the caller drives the receiver end
/// of the queue out to the network.
pub struct SubscriberHandle {
    pub id: Uuid,
    pub receiver: mpsc::Receiver<EngineEvent>,
}

#[derive(Default)]
pub struct SubscriberHub {
    clients: DashMap<Uuid, ClientState>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber with a fresh bounded queue. Default
    /// subscription is broadcast-all.
    pub fn register(&self) -> SubscriberHandle {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        self.clients.insert(
            id,
            ClientState {
                sender,
                subscriptions: RwLock::new(None),
                last_pong: RwLock::new(Instant::now()),
            },
        );
        SubscriberHandle { id, receiver }
    }

    pub fn remove(&self, id: Uuid) {
        self.clients.remove(&id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Handles a parsed inbound client frame. `subscribe`/`unsubscribe`
    /// mutate the per-client filter; `ping` updates the keep-alive clock
    /// (the transport loop replies with a pong frame).
    pub fn handle_client_message(&self, id: Uuid, msg: ClientMessage) {
        let Some(client) = self.clients.get(&id) else {
            return;
        };
        match msg {
            ClientMessage::Subscribe { strategy_id: Some(sid) } => {
                client
                    .subscriptions
                    .write()
                    .get_or_insert_with(HashSet::new)
                    .insert(sid);
            }
            ClientMessage::Subscribe { strategy_id: None } => {
                *client.subscriptions.write() = None;
            }
            ClientMessage::Unsubscribe { strategy_id: Some(sid) } => {
                if let Some(set) = client.subscriptions.write().as_mut() {
                    set.remove(&sid);
                }
            }
            ClientMessage::Unsubscribe { strategy_id: None } => {
                client.subscriptions.write().get_or_insert_with(HashSet::new);
            }
            ClientMessage::Ping => {
                *client.last_pong.write() = Instant::now();
            }
        }
    }

    /// Records a pong reply from the transport loop, resetting the
    /// keep-alive clock independently of `Ping` client messages.
    pub fn record_pong(&self, id: Uuid) {
        if let Some(client) = self.clients.get(&id) {
            *client.last_pong.write() = Instant::now();
        }
    }

    /// Fans an event out to every client whose filter admits it. A client
    /// whose queue is full is evicted (removed + queue dropped, closing
    /// the receiver) rather than blocked on.
    pub fn broadcast(&self, event: &EngineEvent) {
        let mut evict = Vec::new();
        for entry in self.clients.iter() {
            let id = *entry.key();
            let client = entry.value();
            let admitted = match client.subscriptions.read().as_ref() {
                None => true,
                Some(set) => set.contains(&event.strategy_id),
            };
            if !admitted {
                continue;
            }
            match client.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client_id = %id, "subscriber queue full, evicting slow consumer");
                    evict.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    evict.push(id);
                }
            }
        }
        for id in evict {
            self.clients.remove(&id);
        }
    }

    /// Removes clients whose last pong predates `PONG_TIMEOUT`. Intended
    /// to be called on the 30s keep-alive tick alongside sending pings.
    pub fn sweep_stale(&self) -> Vec<Uuid> {
        let now = Instant::now();
        let stale: Vec<Uuid> = self
            .clients
            .iter()
            .filter(|e| now.duration_since(*e.value().last_pong.read()) > PONG_TIMEOUT)
            .map(|e| *e.key())
            .collect();
        for id in &stale {
            debug!(client_id = %id, "evicting subscriber after pong timeout");
            self.clients.remove(id);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_types::EngineEventKind;

    fn sample_event(strategy_id: Uuid) -> EngineEvent {
        EngineEvent::new(strategy_id, EngineEventKind::SimulationStarted { run_id: Uuid::new_v4() })
    }

    #[tokio::test]
    async fn broadcast_default_reaches_all_clients() {
        let hub = SubscriberHub::new();
        let mut h1 = hub.register();
        let mut h2 = hub.register();
        let event = sample_event(Uuid::new_v4());
        hub.broadcast(&event);
        assert!(h1.receiver.recv().await.is_some());
        assert!(h2.receiver.recv().await.is_some());
    }

    #[tokio::test]
    async fn subscription_filter_admits_only_matching_strategy() {
        let hub = SubscriberHub::new();
        let handle = hub.register();
        let wanted = Uuid::new_v4();
        hub.handle_client_message(handle.id, ClientMessage::Subscribe { strategy_id: Some(wanted) });

        let mut handle = handle;
        hub.broadcast(&sample_event(Uuid::new_v4()));
        hub.broadcast(&sample_event(wanted));

        let received = handle.receiver.recv().await.unwrap();
        assert_eq!(received.strategy_id, wanted);
    }

    #[tokio::test]
    async fn slow_consumer_is_evicted_on_full_queue() {
        let hub = SubscriberHub::new();
        let handle = hub.register();
        for _ in 0..(CLIENT_QUEUE_CAPACITY + 1) {
            hub.broadcast(&sample_event(Uuid::new_v4()));
        }
        assert_eq!(hub.client_count(), 0);
        drop(handle);
    }

    #[tokio::test]
    async fn ping_updates_keepalive_clock() {
        let hub = SubscriberHub::new();
        let handle = hub.register();
        hub.handle_client_message(handle.id, ClientMessage::Ping);
        assert!(hub.sweep_stale().is_empty());
    }
}
