//! The Store: durable, key-addressed, concurrency-safe persistence for
//! tokens, trades, strategies, simulated trades, simulation runs, and
//! strategy metrics.
//!
//! [`Store`] is a narrow capability trait — the Engine and HTTP Surface
//! depend on it, never on a concrete backend. Two implementations are
//! provided: [`postgres::PostgresStore`] for production, and
//! [`memory::MemoryStore`] (DashMap-backed) for tests and local
//! development without a database.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sim_types::{SimResult, SimulatedTrade, SimulationRun, Strategy, StrategyMetric, Token, Trade};
use uuid::Uuid;

/// Sort criterion for `Strategies::Top`. See the Open Question decision on
/// ranking: `Performance` uses [`StrategyMetric::performance_score`],
/// `Recent` sorts by `updated_at`, and `Votes` aliases `Recent` because no
/// voting feature exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopCriteria {
    Performance,
    Votes,
    Recent,
}

impl TopCriteria {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "performance" => Some(Self::Performance),
            "votes" => Some(Self::Votes),
            "recent" => Some(Self::Recent),
            _ => None,
        }
    }
}

/// An append-only audit-trail row mirroring Event Bus output, so the
/// dashboard can replay recent history on websocket (re)connect (the
/// Subscriber Hub itself is explicitly non-durable).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SimulationEventRow {
    pub id: Uuid,
    pub strategy_id: Uuid,
    pub run_id: Option<Uuid>,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// The Store's full capability surface, per the component design.
#[async_trait]
pub trait Store: Send + Sync {
    // -- Tokens ---------------------------------------------------------
    async fn upsert_token_by_mint(&self, token: Token) -> SimResult<Token>;
    async fn get_token_by_mint(&self, mint: &str) -> SimResult<Option<Token>>;
    async fn get_token_by_id(&self, id: Uuid) -> SimResult<Option<Token>>;
    async fn get_recent_tokens(&self, limit: usize) -> SimResult<Vec<Token>>;
    async fn get_filtered_tokens(
        &self,
        min_mcap_usd: rust_decimal::Decimal,
        max_age_sec: i64,
        limit: usize,
    ) -> SimResult<Vec<Token>>;

    // -- Trades -----------------------------------------------------------
    async fn append_trade(&self, trade: Trade) -> SimResult<Trade>;
    async fn get_trades_by_token(&self, token_id: Uuid, limit: usize) -> SimResult<Vec<Trade>>;

    // -- Strategies -------------------------------------------------------
    async fn create_strategy(&self, strategy: Strategy) -> SimResult<Strategy>;
    async fn get_strategy_by_id(&self, id: Uuid) -> SimResult<Option<Strategy>>;
    async fn list_public_strategies(&self, limit: usize, offset: usize) -> SimResult<Vec<Strategy>>;
    async fn top_strategies(&self, criteria: TopCriteria, limit: usize) -> SimResult<Vec<Strategy>>;

    // -- SimulatedTrades ----------------------------------------------------
    async fn insert_open_trade(&self, trade: SimulatedTrade) -> SimResult<SimulatedTrade>;
    async fn close_trade(
        &self,
        id: Uuid,
        exit_price: rust_decimal::Decimal,
        exit_timestamp: DateTime<Utc>,
        exit_usd_market_cap: Option<rust_decimal::Decimal>,
        profit_loss: rust_decimal::Decimal,
        exit_reason: sim_types::ExitReason,
    ) -> SimResult<SimulatedTrade>;
    async fn get_open_trades_by_strategy(&self, strategy_id: Uuid) -> SimResult<Vec<SimulatedTrade>>;
    async fn get_closed_trades_by_strategy(
        &self,
        strategy_id: Uuid,
        limit: usize,
    ) -> SimResult<Vec<SimulatedTrade>>;

    // -- SimulationRuns -----------------------------------------------------
    async fn create_run(&self, run: SimulationRun) -> SimResult<SimulationRun>;
    async fn update_run_status(&self, id: Uuid, status: sim_types::RunStatus) -> SimResult<SimulationRun>;
    async fn get_runs_by_strategy(&self, strategy_id: Uuid) -> SimResult<Vec<SimulationRun>>;

    // -- Metrics ------------------------------------------------------------
    async fn append_metric(&self, metric: StrategyMetric) -> SimResult<StrategyMetric>;
    async fn latest_metric_by_strategy(&self, strategy_id: Uuid) -> SimResult<Option<StrategyMetric>>;

    // -- Simulation events (ambient audit trail) -----------------------------
    async fn append_event(&self, event: SimulationEventRow) -> SimResult<()>;
    async fn recent_events_by_strategy(&self, strategy_id: Uuid, limit: usize) -> SimResult<Vec<SimulationEventRow>>;
}
