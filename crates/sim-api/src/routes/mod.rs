pub mod ai;
pub mod dashboard;
pub mod health;
pub mod simulations;
pub mod strategies;
pub mod triggers;
