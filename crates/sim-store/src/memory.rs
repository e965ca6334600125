//! An in-memory [`Store`] implementation used by tests and local
//! development without a database. Mirrors the teacher codebase's
//! `DashMap<Key, RwLock<Entry>>` concurrency idiom for concurrency-safe
//! read/write by key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use sim_types::{
    ExitReason, RunStatus, SimError, SimResult, SimulatedTrade, SimulatedTradeStatus,
    SimulationRun, Strategy, StrategyMetric, Token, Trade,
};
use uuid::Uuid;

use crate::{SimulationEventRow, Store, TopCriteria};

/// Concurrency-safe, process-local [`Store`]. Each entity kind lives in its
/// own `DashMap` keyed by id, with a secondary index for lookup-by-business-key
/// (mint address, strategy id) guarded the same way the cache manager guards
/// its `CacheKey -> RwLock<CacheEntry>` map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tokens_by_id: DashMap<Uuid, Token>,
    tokens_by_mint: DashMap<String, Uuid>,
    trades: DashMap<Uuid, Trade>,
    strategies: DashMap<Uuid, Strategy>,
    simulated_trades: DashMap<Uuid, SimulatedTrade>,
    runs: DashMap<Uuid, SimulationRun>,
    metrics: DashMap<Uuid, StrategyMetric>,
    events: DashMap<Uuid, SimulationEventRow>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_token_by_mint(&self, mut token: Token) -> SimResult<Token> {
        if let Some(existing_id) = self.tokens_by_mint.get(&token.mint_address).map(|e| *e) {
            token.id = existing_id;
        } else {
            self.tokens_by_mint.insert(token.mint_address.clone(), token.id);
        }
        self.tokens_by_id.insert(token.id, token.clone());
        Ok(token)
    }

    async fn get_token_by_mint(&self, mint: &str) -> SimResult<Option<Token>> {
        Ok(self
            .tokens_by_mint
            .get(mint)
            .and_then(|id| self.tokens_by_id.get(&*id).map(|t| t.clone())))
    }

    async fn get_token_by_id(&self, id: Uuid) -> SimResult<Option<Token>> {
        Ok(self.tokens_by_id.get(&id).map(|t| t.clone()))
    }

    async fn get_recent_tokens(&self, limit: usize) -> SimResult<Vec<Token>> {
        let mut tokens: Vec<Token> = self.tokens_by_id.iter().map(|e| e.value().clone()).collect();
        tokens.sort_by(|a, b| b.created_timestamp.cmp(&a.created_timestamp));
        tokens.truncate(limit);
        Ok(tokens)
    }

    async fn get_filtered_tokens(
        &self,
        min_mcap_usd: Decimal,
        max_age_sec: i64,
        limit: usize,
    ) -> SimResult<Vec<Token>> {
        let now = Utc::now();
        let mut tokens: Vec<Token> = self
            .tokens_by_id
            .iter()
            .map(|e| e.value().clone())
            .filter(|t| t.usd_market_cap.unwrap_or(Decimal::ZERO) >= min_mcap_usd)
            .filter(|t| t.age_seconds(now) <= max_age_sec)
            .collect();
        tokens.sort_by(|a, b| b.created_timestamp.cmp(&a.created_timestamp));
        tokens.truncate(limit);
        Ok(tokens)
    }

    async fn append_trade(&self, trade: Trade) -> SimResult<Trade> {
        self.trades.insert(trade.id, trade.clone());
        Ok(trade)
    }

    async fn get_trades_by_token(&self, token_id: Uuid, limit: usize) -> SimResult<Vec<Trade>> {
        let mut trades: Vec<Trade> = self
            .trades
            .iter()
            .map(|e| e.value().clone())
            .filter(|t| t.token_id == token_id)
            .collect();
        trades.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        trades.truncate(limit);
        Ok(trades)
    }

    async fn create_strategy(&self, strategy: Strategy) -> SimResult<Strategy> {
        self.strategies.insert(strategy.id, strategy.clone());
        Ok(strategy)
    }

    async fn get_strategy_by_id(&self, id: Uuid) -> SimResult<Option<Strategy>> {
        Ok(self.strategies.get(&id).map(|s| s.clone()))
    }

    async fn list_public_strategies(&self, limit: usize, offset: usize) -> SimResult<Vec<Strategy>> {
        let mut strategies: Vec<Strategy> = self.strategies.iter().map(|e| e.value().clone()).collect();
        strategies.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(strategies.into_iter().skip(offset).take(limit).collect())
    }

    async fn top_strategies(&self, criteria: TopCriteria, limit: usize) -> SimResult<Vec<Strategy>> {
        let mut strategies: Vec<Strategy> = self.strategies.iter().map(|e| e.value().clone()).collect();
        match criteria {
            TopCriteria::Performance => {
                let mut scored: Vec<(Strategy, Decimal)> = Vec::with_capacity(strategies.len());
                for s in strategies.drain(..) {
                    let score = self
                        .latest_metric_by_strategy(s.id)
                        .await?
                        .map(|m| m.performance_score())
                        .unwrap_or(Decimal::MIN);
                    scored.push((s, score));
                }
                scored.sort_by(|a, b| b.1.cmp(&a.1));
                Ok(scored.into_iter().take(limit).map(|(s, _)| s).collect())
            }
            TopCriteria::Votes | TopCriteria::Recent => {
                strategies.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                strategies.truncate(limit);
                Ok(strategies)
            }
        }
    }

    async fn insert_open_trade(&self, trade: SimulatedTrade) -> SimResult<SimulatedTrade> {
        let has_open = self.simulated_trades.iter().any(|e| {
            let t = e.value();
            t.strategy_id == trade.strategy_id
                && t.token_id == trade.token_id
                && t.status == SimulatedTradeStatus::Open
        });
        if has_open {
            return Err(SimError::StateConflict(format!(
                "open position already exists for strategy {} token {}",
                trade.strategy_id, trade.token_id
            )));
        }
        self.simulated_trades.insert(trade.id, trade.clone());
        Ok(trade)
    }

    async fn close_trade(
        &self,
        id: Uuid,
        exit_price: Decimal,
        exit_timestamp: DateTime<Utc>,
        exit_usd_market_cap: Option<Decimal>,
        profit_loss: Decimal,
        exit_reason: ExitReason,
    ) -> SimResult<SimulatedTrade> {
        let mut entry = self
            .simulated_trades
            .get_mut(&id)
            .ok_or_else(|| SimError::not_found(format!("simulated_trade {id}")))?;
        if entry.status != SimulatedTradeStatus::Open {
            return Err(SimError::StateConflict(format!(
                "simulated_trade {id} is not open"
            )));
        }
        entry.status = SimulatedTradeStatus::Closed;
        entry.exit_price = Some(exit_price);
        entry.exit_timestamp = Some(exit_timestamp);
        entry.exit_usd_market_cap = exit_usd_market_cap;
        entry.profit_loss = Some(profit_loss);
        entry.exit_reason = Some(exit_reason);
        Ok(entry.clone())
    }

    async fn get_open_trades_by_strategy(&self, strategy_id: Uuid) -> SimResult<Vec<SimulatedTrade>> {
        Ok(self
            .simulated_trades
            .iter()
            .map(|e| e.value().clone())
            .filter(|t| t.strategy_id == strategy_id && t.status == SimulatedTradeStatus::Open)
            .collect())
    }

    async fn get_closed_trades_by_strategy(
        &self,
        strategy_id: Uuid,
        limit: usize,
    ) -> SimResult<Vec<SimulatedTrade>> {
        let mut trades: Vec<SimulatedTrade> = self
            .simulated_trades
            .iter()
            .map(|e| e.value().clone())
            .filter(|t| t.strategy_id == strategy_id && t.status == SimulatedTradeStatus::Closed)
            .collect();
        trades.sort_by(|a, b| b.exit_timestamp.cmp(&a.exit_timestamp));
        trades.truncate(limit);
        Ok(trades)
    }

    async fn create_run(&self, run: SimulationRun) -> SimResult<SimulationRun> {
        self.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn update_run_status(&self, id: Uuid, status: RunStatus) -> SimResult<SimulationRun> {
        let mut entry = self
            .runs
            .get_mut(&id)
            .ok_or_else(|| SimError::not_found(format!("simulation_run {id}")))?;
        entry.status = status;
        if matches!(status, RunStatus::Completed | RunStatus::Failed) {
            entry.end_time = Some(Utc::now());
        }
        Ok(entry.clone())
    }

    async fn get_runs_by_strategy(&self, strategy_id: Uuid) -> SimResult<Vec<SimulationRun>> {
        let mut runs: Vec<SimulationRun> = self
            .runs
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| r.strategy_id == strategy_id)
            .collect();
        runs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(runs)
    }

    async fn append_metric(&self, metric: StrategyMetric) -> SimResult<StrategyMetric> {
        self.metrics.insert(metric.id, metric.clone());
        Ok(metric)
    }

    async fn latest_metric_by_strategy(&self, strategy_id: Uuid) -> SimResult<Option<StrategyMetric>> {
        Ok(self
            .metrics
            .iter()
            .map(|e| e.value().clone())
            .filter(|m| m.strategy_id == strategy_id)
            .max_by_key(|m| m.created_at))
    }

    async fn append_event(&self, event: SimulationEventRow) -> SimResult<()> {
        self.events.insert(event.id, event);
        Ok(())
    }

    async fn recent_events_by_strategy(&self, strategy_id: Uuid, limit: usize) -> SimResult<Vec<SimulationEventRow>> {
        let mut events: Vec<SimulationEventRow> = self
            .events
            .iter()
            .map(|e| e.value().clone())
            .filter(|e| e.strategy_id == strategy_id)
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(limit);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_token() -> Token {
        Token::new("Tmint", Utc::now())
    }

    #[tokio::test]
    async fn upsert_token_by_mint_is_idempotent_on_id() {
        let store = MemoryStore::new();
        let t1 = store.upsert_token_by_mint(sample_token()).await.unwrap();
        let mut t2 = sample_token();
        t2.mint_address = t1.mint_address.clone();
        let t2 = store.upsert_token_by_mint(t2).await.unwrap();
        assert_eq!(t1.id, t2.id);
    }

    #[tokio::test]
    async fn position_uniqueness_enforced_on_insert() {
        let store = MemoryStore::new();
        let strategy_id = Uuid::new_v4();
        let token_id = Uuid::new_v4();
        let run_id = Uuid::new_v4();
        let trade = SimulatedTrade::open(strategy_id, token_id, run_id, dec!(0.001), Utc::now(), dec!(1.0), None);
        store.insert_open_trade(trade.clone()).await.unwrap();

        let second = SimulatedTrade::open(strategy_id, token_id, run_id, dec!(0.002), Utc::now(), dec!(1.0), None);
        let err = store.insert_open_trade(second).await.unwrap_err();
        assert!(matches!(err, SimError::StateConflict(_)));
    }

    #[tokio::test]
    async fn close_trade_is_compare_and_set() {
        let store = MemoryStore::new();
        let trade = SimulatedTrade::open(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), dec!(0.001), Utc::now(), dec!(1.0), None);
        let id = trade.id;
        store.insert_open_trade(trade).await.unwrap();

        store
            .close_trade(id, dec!(0.0013), Utc::now(), None, dec!(0.3), ExitReason::TakeProfit)
            .await
            .unwrap();

        let err = store
            .close_trade(id, dec!(0.0013), Utc::now(), None, dec!(0.3), ExitReason::TakeProfit)
            .await
            .unwrap_err();
        assert!(matches!(err, SimError::StateConflict(_)));
    }
}
