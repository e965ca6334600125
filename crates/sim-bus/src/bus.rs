//! The Event Bus: in-process publish/fan-out of the seven simulation event
//! kinds. Best-effort, in-order per producer, no durability, no replay —
//! publishing never blocks the Engine and a failed publish only ever
//! increments a counter (the same "log, then best-effort send, never
//! fatal" posture the risk monitor uses for alert emission).

use sim_types::EngineEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the broadcast channel backing the bus. A lagging
/// subscriber that falls behind by more than this many events misses the
/// ones in between — acceptable per the Event Bus's no-durability,
/// no-replay contract.
const BUS_CAPACITY: usize = 1024;

pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
    publish_failures: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _rx) = broadcast::channel(BUS_CAPACITY);
        Self {
            sender,
            publish_failures: AtomicU64::new(0),
        }
    }

    /// Publishes an event to every current subscriber. Never blocks and
    /// never fails the caller: with zero subscribers this is a no-op save
    /// for a counter increment.
    pub fn publish(&self, event: EngineEvent) {
        if self.sender.send(event).is_err() {
            self.publish_failures.fetch_add(1, Ordering::Relaxed);
            debug!("event bus publish with no active subscribers");
        }
    }

    /// Subscribes to the event stream. The returned receiver sees only
    /// events published after this call — there is no replay.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_types::EngineEventKind;
    use uuid::Uuid;

    #[tokio::test]
    async fn subscribers_receive_published_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let strategy_id = Uuid::new_v4();

        bus.publish(EngineEvent::new(
            strategy_id,
            EngineEventKind::SimulationStarted { run_id: Uuid::new_v4() },
        ));
        bus.publish(EngineEvent::new(
            strategy_id,
            EngineEventKind::SimulationCompleted {
                total_iterations: 1,
                execution_time_sec: 1,
                failed: false,
            },
        ));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first.kind, EngineEventKind::SimulationStarted { .. }));
        assert!(matches!(second.kind, EngineEventKind::SimulationCompleted { .. }));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(EngineEvent::new(
            Uuid::new_v4(),
            EngineEventKind::SimulationStarted { run_id: Uuid::new_v4() },
        ));
        assert_eq!(bus.publish_failures(), 1);
    }
}
