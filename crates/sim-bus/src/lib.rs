//! Event Bus (in-process publish/fan-out of simulation events) and
//! Subscriber Hub (network fan-out with per-client bounded queues and
//! slow-consumer eviction).

pub mod bus;
pub mod hub;

pub use bus::EventBus;
pub use hub::{ClientMessage, SubscriberHandle, SubscriberHub};
