//! Simulation Engine: owns every running Simulation, enforces the
//! concurrency cap, fans out market events, and evaluates each
//! strategy's entry/exit rules in real time.

pub mod engine;
pub mod simulation;

pub use engine::{Engine, MarketEvent};
pub use simulation::Simulation;
