//! Read-only shapes returned by the Simulation Engine's public contract:
//! [`SimulationStatus`] (cheap liveness + headline numbers) and
//! [`SimulationSummary`] (the fuller snapshot used by the dashboard and
//! `/simulations/*` routes).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::simulation::RunStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStatus {
    pub strategy_id: Uuid,
    pub run_id: Option<Uuid>,
    pub running: bool,
    pub status: Option<RunStatus>,
}

/// A recomputable snapshot: every field here is derivable from the
/// closed-trade log plus open positions, which is what the
/// snapshot-idempotence property checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub strategy_id: Uuid,
    pub run_id: Option<Uuid>,
    pub running: bool,
    pub status: Option<RunStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub balance: Decimal,
    pub initial_balance: Decimal,
    pub roi: Decimal,
    pub win_rate: Decimal,
    pub closed_count: u64,
    pub win_count: u64,
    pub loss_count: u64,
    pub open_count: u64,
    pub cumulative_profit: Decimal,
    pub peak_balance: Decimal,
    pub max_drawdown: Decimal,
}
