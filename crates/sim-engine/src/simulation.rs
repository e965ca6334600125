//! The Simulation object: one strategy's live-forward position state.
//!
//! A `Simulation` is owned exclusively by the single task running it — no
//! other task ever mutates `open_positions` or the running aggregates.
//! Reads (status queries, periodic snapshots) are satisfied by enqueueing
//! a request alongside market events, so they observe state strictly
//! after everything enqueued ahead of them, matching the in-order
//! processing guarantee.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sim_types::{ExitReason, SimulatedTrade, SimulatedTradeStatus, SimulationSummary, StrategyConfig, Token, Trade};
use tracing::debug;
use uuid::Uuid;

/// Outcome of processing one inbound trade against the entry rules.
pub enum EntryOutcome {
    Opened(SimulatedTrade),
    BalanceDepleted { remaining_balance: Decimal, position_size: Decimal },
}

/// A position's max-hold deadline, ordered earliest-first via `Reverse`
/// in the owning `BinaryHeap`. `entry_timestamp` disambiguates a token
/// that closed and reopened before its old deadline would have fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct HoldDeadline {
    deadline: DateTime<Utc>,
    token_id: Uuid,
    entry_timestamp: DateTime<Utc>,
}

pub struct Simulation {
    pub strategy_id: Uuid,
    pub run_id: Uuid,
    pub config: StrategyConfig,

    pub balance: Decimal,
    open_positions: HashMap<Uuid, SimulatedTrade>,
    hold_deadlines: BinaryHeap<std::cmp::Reverse<HoldDeadline>>,

    closed_count: u64,
    win_count: u64,
    loss_count: u64,
    cumulative_profit: Decimal,
    peak_balance: Decimal,
    max_drawdown: Decimal,
    /// Count of market events (token or trade) this run has processed,
    /// independent of `open_count`/`closed_count` so it survives
    /// `close_all_manual` at shutdown. Reported as `total_iterations` on
    /// `simulation_completed`.
    iterations: u64,

    tokens: HashMap<Uuid, Token>,
    entry_signals: HashMap<Uuid, VecDeque<DateTime<Utc>>>,
    /// Balance value at which depletion was last announced; suppresses a
    /// repeat `simulation_balance_depleted` until the balance changes.
    last_depleted_balance: Option<Decimal>,
}

impl Simulation {
    pub fn new(strategy_id: Uuid, run_id: Uuid, config: StrategyConfig) -> Self {
        let initial_balance = config.initial_balance;
        Self {
            strategy_id,
            run_id,
            config,
            balance: initial_balance,
            open_positions: HashMap::new(),
            hold_deadlines: BinaryHeap::new(),
            closed_count: 0,
            win_count: 0,
            loss_count: 0,
            cumulative_profit: Decimal::ZERO,
            peak_balance: initial_balance,
            max_drawdown: Decimal::ZERO,
            iterations: 0,
            tokens: HashMap::new(),
            entry_signals: HashMap::new(),
            last_depleted_balance: None,
        }
    }

    pub fn observe_token(&mut self, token: Token) {
        self.tokens.insert(token.id, token);
        self.iterations += 1;
    }

    /// Records one processed trade event toward `total_iterations`. Called
    /// once per inbound `tradeCreated`, regardless of whether it opened,
    /// closed, or triggered neither.
    pub fn record_trade_iteration(&mut self) {
        self.iterations += 1;
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn open_position(&mut self, token_id: Uuid) -> Option<&SimulatedTrade> {
        self.open_positions.get(&token_id)
    }

    /// Resolves a token id back to its mint address, from the Simulation's
    /// own cache of observed tokens (populated by `observe_token`).
    pub fn token_mint(&self, token_id: Uuid) -> Option<&str> {
        self.tokens.get(&token_id).map(|t| t.mint_address.as_str())
    }

    /// The earliest outstanding max-hold deadline, if any open position
    /// has one. Drives the task's timer-wheel `select!` arm.
    pub fn next_hold_deadline(&self) -> Option<DateTime<Utc>> {
        self.hold_deadlines.peek().map(|d| d.0.deadline)
    }

    fn prune_and_count_buys(&mut self, token_id: Uuid, now: DateTime<Utc>) -> u32 {
        let window = chrono::Duration::seconds(self.config.entry_time_window_sec as i64);
        let entries = self.entry_signals.entry(token_id).or_default();
        entries.push_back(now);
        while let Some(&front) = entries.front() {
            if now - front > window {
                entries.pop_front();
            } else {
                break;
            }
        }
        entries.len() as u32
    }

    /// Entry evaluation per the per-simulation state machine: resolves
    /// the token, applies the filters, and opens a position once the
    /// rolling buy count clears the threshold.
    pub fn process_buy(&mut self, trade: &Trade, now: DateTime<Utc>) -> Option<EntryOutcome> {
        let token = self.tokens.get(&trade.token_id)?.clone();
        let entry_price = trade.price()?;

        if self.config.only_new_tokens
            && token.age_seconds(now) > self.config.entry_time_window_sec as i64
        {
            return None;
        }

        let usd_market_cap = trade.usd_market_cap.or(token.usd_market_cap).unwrap_or(Decimal::ZERO);
        if usd_market_cap < self.config.market_cap_threshold {
            return None;
        }

        let buy_count = self.prune_and_count_buys(trade.token_id, now);
        if buy_count < self.config.min_buys_for_entry {
            return None;
        }
        if self.open_positions.contains_key(&trade.token_id) {
            return None;
        }

        if self.balance < self.config.fixed_position_size_sol {
            if self.last_depleted_balance != Some(self.balance) {
                self.last_depleted_balance = Some(self.balance);
                return Some(EntryOutcome::BalanceDepleted {
                    remaining_balance: self.balance,
                    position_size: self.config.fixed_position_size_sol,
                });
            }
            return None;
        }

        let position_size = self.config.fixed_position_size_sol;
        self.balance -= position_size;
        self.last_depleted_balance = None;

        let opened = SimulatedTrade::open(
            self.strategy_id,
            trade.token_id,
            self.run_id,
            entry_price,
            now,
            position_size,
            usd_market_cap.into(),
        );
        self.open_positions.insert(trade.token_id, opened.clone());
        self.hold_deadlines.push(std::cmp::Reverse(HoldDeadline {
            deadline: now + chrono::Duration::seconds(self.config.max_hold_time_sec as i64),
            token_id: trade.token_id,
            entry_timestamp: now,
        }));

        Some(EntryOutcome::Opened(opened))
    }

    /// Exit evaluation against a fresh mark price. Tie-break order is
    /// `take_profit` > `stop_loss` > `max_hold`.
    fn exit_reason_for(&self, trade: &SimulatedTrade, mark: Decimal, now: DateTime<Utc>) -> Option<ExitReason> {
        let pnl_pct = trade.pnl_pct(mark);
        if pnl_pct >= self.config.take_profit_pct {
            Some(ExitReason::TakeProfit)
        } else if pnl_pct <= -self.config.stop_loss_pct {
            Some(ExitReason::StopLoss)
        } else if (now - trade.entry_timestamp).num_seconds() >= self.config.max_hold_time_sec as i64 {
            Some(ExitReason::MaxHold)
        } else {
            None
        }
    }

    /// Processes a trade against any open position on its token. Returns
    /// the closed trade (fully populated with exit fields) if one
    /// triggered.
    pub fn process_mark(&mut self, token_id: Uuid, mark: Decimal, now: DateTime<Utc>) -> Option<SimulatedTrade> {
        let open = self.open_positions.get(&token_id)?;
        let reason = self.exit_reason_for(open, mark, now)?;
        self.close(token_id, mark, reason, now)
    }

    /// Fires due max-hold timers that have no corresponding trade event
    /// (Scenario B: the position closes at `entryPrice`, unchanged mark).
    pub fn process_timer_tick(&mut self, now: DateTime<Utc>) -> Vec<SimulatedTrade> {
        let mut closed = Vec::new();
        while let Some(std::cmp::Reverse(top)) = self.hold_deadlines.peek().copied() {
            if top.deadline > now {
                break;
            }
            self.hold_deadlines.pop();
            let Some(open) = self.open_positions.get(&top.token_id) else {
                continue;
            };
            if open.entry_timestamp != top.entry_timestamp || open.status != SimulatedTradeStatus::Open {
                continue;
            }
            let mark = open.entry_price;
            if let Some(trade) = self.close(top.token_id, mark, ExitReason::MaxHold, now) {
                closed.push(trade);
            }
        }
        closed
    }

    fn close(&mut self, token_id: Uuid, mark: Decimal, reason: ExitReason, now: DateTime<Utc>) -> Option<SimulatedTrade> {
        let mut trade = self.open_positions.remove(&token_id)?;
        let profit_loss = trade.compute_profit_loss(mark);
        trade.exit_price = Some(mark);
        trade.exit_timestamp = Some(now);
        trade.exit_usd_market_cap = self.tokens.get(&token_id).and_then(|t| t.usd_market_cap);
        trade.profit_loss = Some(profit_loss);
        trade.exit_reason = Some(reason);
        trade.status = SimulatedTradeStatus::Closed;

        self.balance += trade.position_size + profit_loss;
        self.closed_count += 1;
        if profit_loss >= Decimal::ZERO {
            self.win_count += 1;
        } else {
            self.loss_count += 1;
        }
        self.cumulative_profit += profit_loss;
        if self.balance > self.peak_balance {
            self.peak_balance = self.balance;
        }
        let drawdown = self.peak_balance - self.balance;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }
        self.last_depleted_balance = None;

        debug!(strategy_id = %self.strategy_id, token_id = %token_id, reason = reason.as_str(), "position closed");
        Some(trade)
    }

    /// Closes every open position with reason `manual`, used by
    /// `StopSimulation` and `Shutdown`. Mark price is the last known mark
    /// (the entry price, if no trade has arrived since).
    pub fn close_all_manual(&mut self, now: DateTime<Utc>) -> Vec<SimulatedTrade> {
        let token_ids: Vec<Uuid> = self.open_positions.keys().copied().collect();
        let mut closed = Vec::new();
        for token_id in token_ids {
            let mark = self.open_positions[&token_id].entry_price;
            if let Some(trade) = self.close(token_id, mark, ExitReason::Manual, now) {
                closed.push(trade);
            }
        }
        closed
    }

    pub fn open_count(&self) -> u64 {
        self.open_positions.len() as u64
    }

    pub fn win_rate(&self) -> Decimal {
        if self.closed_count == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(self.win_count) / Decimal::from(self.closed_count) * Decimal::from(100)
        }
    }

    pub fn roi(&self) -> Decimal {
        if self.config.initial_balance.is_zero() {
            Decimal::ZERO
        } else {
            (self.balance - self.config.initial_balance) / self.config.initial_balance * Decimal::from(100)
        }
    }

    pub fn summary(&self, running: bool, started_at: Option<DateTime<Utc>>, status: Option<sim_types::RunStatus>) -> SimulationSummary {
        SimulationSummary {
            strategy_id: self.strategy_id,
            run_id: Some(self.run_id),
            running,
            status,
            started_at,
            balance: self.balance,
            initial_balance: self.config.initial_balance,
            roi: self.roi(),
            win_rate: self.win_rate(),
            closed_count: self.closed_count,
            win_count: self.win_count,
            loss_count: self.loss_count,
            open_count: self.open_count(),
            cumulative_profit: self.cumulative_profit,
            peak_balance: self.peak_balance,
            max_drawdown: self.max_drawdown,
        }
    }
}

/// Wall-clock interval between periodic snapshot emissions.
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn scenario_a_config() -> StrategyConfig {
        StrategyConfig {
            market_cap_threshold: dec!(0),
            only_new_tokens: false,
            min_buys_for_entry: 1,
            entry_time_window_sec: 60,
            take_profit_pct: dec!(25),
            stop_loss_pct: dec!(10),
            max_hold_time_sec: 600,
            fixed_position_size_sol: dec!(1.0),
            initial_balance: dec!(10.0),
        }
    }

    fn sample_trade(token_id: Uuid, sol: Decimal, tokens: Decimal, is_buy: bool) -> Trade {
        Trade {
            id: Uuid::new_v4(),
            token_id,
            mint_address: "T".into(),
            signature: Uuid::new_v4().to_string(),
            sol_amount: sol,
            token_amount: tokens,
            is_buy,
            user_address: "u".into(),
            timestamp: Utc::now(),
            market_cap: None,
            usd_market_cap: Some(dec!(5000)),
        }
    }

    #[test]
    fn scenario_a_take_profit_exit() {
        let mut sim = Simulation::new(Uuid::new_v4(), Uuid::new_v4(), scenario_a_config());
        let token_id = Uuid::new_v4();
        let now = Utc::now();
        sim.tokens.insert(token_id, Token::new("T", now));
        let buy1 = sample_trade(token_id, dec!(1.0), dec!(1000), true);
        let outcome = sim.process_buy(&buy1, now).unwrap();
        let opened = match outcome {
            EntryOutcome::Opened(t) => t,
            _ => panic!("expected open"),
        };
        assert_eq!(opened.entry_price, dec!(0.001));
        assert_eq!(sim.balance, dec!(9.0));

        let closed = sim.process_mark(token_id, dec!(0.0013), now).unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::TakeProfit));
        assert_eq!(closed.profit_loss, Some(dec!(0.3)));
        assert_eq!(sim.balance, dec!(10.30));
    }

    #[test]
    fn scenario_b_max_hold_exit_restores_balance() {
        let mut cfg = scenario_a_config();
        cfg.max_hold_time_sec = 1;
        let mut sim = Simulation::new(Uuid::new_v4(), Uuid::new_v4(), cfg);
        let token_id = Uuid::new_v4();
        let t0 = Utc::now();
        sim.tokens.insert(token_id, Token::new("T", t0));

        let buy = sample_trade(token_id, dec!(1.0), dec!(1000), true);
        sim.process_buy(&buy, t0).unwrap();
        assert_eq!(sim.balance, dec!(9.0));

        let later = t0 + chrono::Duration::seconds(1);
        let fired = sim.process_timer_tick(later);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].exit_reason, Some(ExitReason::MaxHold));
        assert_eq!(fired[0].profit_loss, Some(Decimal::ZERO));
        assert_eq!(sim.balance, dec!(10.0));
    }

    #[test]
    fn scenario_c_balance_depletion_is_rate_limited() {
        let mut cfg = scenario_a_config();
        cfg.fixed_position_size_sol = dec!(4.0);
        cfg.initial_balance = dec!(5.0);
        let mut sim = Simulation::new(Uuid::new_v4(), Uuid::new_v4(), cfg);

        let now = Utc::now();
        let tokens: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for t in &tokens {
            sim.tokens.insert(*t, Token::new("T", now));
        }

        let buy0 = sample_trade(tokens[0], dec!(1.0), dec!(1000), true);
        match sim.process_buy(&buy0, now).unwrap() {
            EntryOutcome::Opened(_) => {}
            _ => panic!("expected open"),
        }
        assert_eq!(sim.balance, dec!(1.0));

        let buy1 = sample_trade(tokens[1], dec!(1.0), dec!(1000), true);
        let second = sim.process_buy(&buy1, now).unwrap();
        assert!(matches!(second, EntryOutcome::BalanceDepleted { remaining_balance, position_size }
            if remaining_balance == dec!(1.0) && position_size == dec!(4.0)));

        let buy2 = sample_trade(tokens[2], dec!(1.0), dec!(1000), true);
        assert!(sim.process_buy(&buy2, now).is_none());
    }
}
