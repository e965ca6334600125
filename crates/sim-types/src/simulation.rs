//! `SimulatedTrade`, `SimulationRun`, and `StrategyMetric` — the durable
//! record of a Simulation's positions, lifecycle, and periodic snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    MaxHold,
    Manual,
    BalanceDepleted,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::MaxHold => "max_hold",
            ExitReason::Manual => "manual",
            ExitReason::BalanceDepleted => "balance_depleted",
        }
    }
}

/// Lifecycle status of a [`SimulatedTrade`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedTradeStatus {
    Open,
    Closed,
    Canceled,
}

/// A single simulated position: opened on an entry signal, closed on an
/// exit trigger. At most one `open` row may exist per (strategy, token) —
/// the position-uniqueness invariant, enforced by the owning Simulation's
/// `openPositions` map and by the Store's compare-and-set `Close`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedTrade {
    pub id: Uuid,
    pub strategy_id: Uuid,
    pub token_id: Uuid,
    pub simulation_run_id: Uuid,
    pub entry_price: Decimal,
    pub entry_timestamp: DateTime<Utc>,
    pub position_size: Decimal,
    pub entry_usd_market_cap: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub exit_timestamp: Option<DateTime<Utc>>,
    pub exit_usd_market_cap: Option<Decimal>,
    pub profit_loss: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub status: SimulatedTradeStatus,
}

impl SimulatedTrade {
    pub fn open(
        strategy_id: Uuid,
        token_id: Uuid,
        simulation_run_id: Uuid,
        entry_price: Decimal,
        entry_timestamp: DateTime<Utc>,
        position_size: Decimal,
        entry_usd_market_cap: Option<Decimal>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_id,
            token_id,
            simulation_run_id,
            entry_price,
            entry_timestamp,
            position_size,
            entry_usd_market_cap,
            exit_price: None,
            exit_timestamp: None,
            exit_usd_market_cap: None,
            profit_loss: None,
            exit_reason: None,
            status: SimulatedTradeStatus::Open,
        }
    }

    /// `profitLoss = positionSize * (exitPrice/entryPrice - 1)`, per §3's
    /// invariant on closed rows.
    pub fn compute_profit_loss(&self, exit_price: Decimal) -> Decimal {
        self.position_size * (exit_price / self.entry_price - Decimal::ONE)
    }

    /// `pnlPct = (mark / entryPrice - 1) * 100`, used by exit evaluation.
    pub fn pnl_pct(&self, mark: Decimal) -> Decimal {
        (mark / self.entry_price - Decimal::ONE) * Decimal::from(100)
    }
}

/// Status of a [`SimulationRun`]'s lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Preparing,
    Running,
    Completed,
    Failed,
}

/// The durable record of one Simulation's start-to-end lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRun {
    pub id: Uuid,
    pub strategy_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub simulation_parameters: serde_json::Value,
}

impl SimulationRun {
    pub fn new(strategy_id: Uuid, simulation_parameters: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_id,
            start_time: Utc::now(),
            end_time: None,
            status: RunStatus::Preparing,
            simulation_parameters,
        }
    }
}

/// A periodic snapshot of a running simulation's aggregates. Append-only;
/// the latest row per strategy is the authoritative metrics view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyMetric {
    pub id: Uuid,
    pub run_id: Uuid,
    pub strategy_id: Uuid,
    pub win_rate: Decimal,
    pub avg_profit: Decimal,
    pub avg_loss: Decimal,
    pub max_drawdown: Decimal,
    pub total_trades: u64,
    pub successful_trades: u64,
    pub balance: Decimal,
    pub roi: Decimal,
    pub created_at: DateTime<Utc>,
}

impl StrategyMetric {
    /// Composite ranking score for `top?criteria=performance` (Open
    /// Question 3): weights ROI by sample size so a single lucky trade
    /// cannot outrank a consistent performer, with a small winRate bonus.
    pub fn performance_score(&self) -> Decimal {
        if self.total_trades == 0 {
            return Decimal::MIN;
        }
        let sample_weight = (Decimal::from(self.total_trades) / Decimal::from(10)).min(Decimal::ONE);
        self.roi * sample_weight + self.win_rate * Decimal::new(1, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn profit_loss_matches_spec_formula_take_profit() {
        let trade = SimulatedTrade::open(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            dec!(0.001),
            Utc::now(),
            dec!(1.0),
            Some(dec!(5000)),
        );
        let pnl = trade.compute_profit_loss(dec!(0.0013));
        assert_eq!(pnl, dec!(0.3));
    }

    #[test]
    fn pnl_pct_matches_scenario_a() {
        let trade = SimulatedTrade::open(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            dec!(0.001),
            Utc::now(),
            dec!(1.0),
            None,
        );
        assert_eq!(trade.pnl_pct(dec!(0.0013)), dec!(30.0));
    }

    #[test]
    fn zero_trade_strategies_score_last() {
        let metric = StrategyMetric {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            strategy_id: Uuid::new_v4(),
            win_rate: dec!(0),
            avg_profit: dec!(0),
            avg_loss: dec!(0),
            max_drawdown: dec!(0),
            total_trades: 0,
            successful_trades: 0,
            balance: dec!(10),
            roi: dec!(0),
            created_at: Utc::now(),
        };
        assert_eq!(metric.performance_score(), Decimal::MIN);
    }
}
