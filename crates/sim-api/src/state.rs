//! Shared application state handed to every route handler.

use std::sync::Arc;

use sim_automation::{AiCaller, Scheduler};
use sim_bus::{EventBus, SubscriberHub};
use sim_engine::Engine;
use sim_store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub bus: Arc<EventBus>,
    pub hub: Arc<SubscriberHub>,
    pub engine: Arc<Engine>,
    pub ai: Arc<AiCaller>,
    pub scheduler: Arc<Scheduler>,
}
