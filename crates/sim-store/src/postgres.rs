//! Postgres-backed [`Store`] implementation via `sqlx`. Runtime-checked
//! queries (not the `query!` compile-time macro) so this crate builds
//! without a live database connection at build time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sim_types::{
    ExitReason, RunStatus, SimError, SimResult, SimulatedTrade, SimulatedTradeStatus,
    SimulationRun, Strategy, StrategyConfig, StrategyMetric, Token, Trade,
};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use crate::{SimulationEventRow, Store, TopCriteria};

/// Embedded schema, applied via `PostgresStore::migrate`. Kept inline
/// (rather than a `migrations/` directory + `sqlx::migrate!`) since this
/// is the platform's only schema version so far.
pub const SCHEMA_SQL: &str = include_str!("schema.sql");

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> SimResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| SimError::TransientIO(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Applies the embedded schema. Idempotent (`CREATE TABLE IF NOT EXISTS`).
    pub async fn migrate(&self) -> SimResult<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| SimError::TransientIO(e.to_string()))?;
        Ok(())
    }

    fn row_to_token(row: &sqlx::postgres::PgRow) -> SimResult<Token> {
        Ok(Token {
            id: row.try_get("id").map_err(db_err)?,
            mint_address: row.try_get("mint_address").map_err(db_err)?,
            creator: row.try_get("creator").map_err(db_err)?,
            name: row.try_get("name").map_err(db_err)?,
            symbol: row.try_get("symbol").map_err(db_err)?,
            market_cap: row.try_get("market_cap").map_err(db_err)?,
            usd_market_cap: row.try_get("usd_market_cap").map_err(db_err)?,
            created_timestamp: row.try_get("created_timestamp").map_err(db_err)?,
            complete: row.try_get("complete").map_err(db_err)?,
        })
    }

    fn row_to_trade(row: &sqlx::postgres::PgRow) -> SimResult<Trade> {
        Ok(Trade {
            id: row.try_get("id").map_err(db_err)?,
            token_id: row.try_get("token_id").map_err(db_err)?,
            mint_address: row.try_get("mint_address").map_err(db_err)?,
            signature: row.try_get("signature").map_err(db_err)?,
            sol_amount: row.try_get("sol_amount").map_err(db_err)?,
            token_amount: row.try_get("token_amount").map_err(db_err)?,
            is_buy: row.try_get("is_buy").map_err(db_err)?,
            user_address: row.try_get("user_address").map_err(db_err)?,
            timestamp: row.try_get("timestamp").map_err(db_err)?,
            market_cap: row.try_get("market_cap").map_err(db_err)?,
            usd_market_cap: row.try_get("usd_market_cap").map_err(db_err)?,
        })
    }

    fn row_to_strategy(row: &sqlx::postgres::PgRow) -> SimResult<Strategy> {
        let config_json: serde_json::Value = row.try_get("config").map_err(db_err)?;
        let config: StrategyConfig = serde_json::from_value(config_json)?;
        let tags_json: serde_json::Value = row.try_get("tags").map_err(db_err)?;
        let tags: Vec<String> = serde_json::from_value(tags_json).unwrap_or_default();
        Ok(Strategy {
            id: row.try_get("id").map_err(db_err)?,
            name: row.try_get("name").map_err(db_err)?,
            description: row.try_get("description").map_err(db_err)?,
            tags,
            config,
            complexity_score: row.try_get("complexity_score").map_err(db_err)?,
            risk_score: row.try_get("risk_score").map_err(db_err)?,
            ai_enhanced: row.try_get("ai_enhanced").map_err(db_err)?,
            created_at: row.try_get("created_at").map_err(db_err)?,
            updated_at: row.try_get("updated_at").map_err(db_err)?,
        })
    }

    fn row_to_simulated_trade(row: &sqlx::postgres::PgRow) -> SimResult<SimulatedTrade> {
        let status_str: String = row.try_get("status").map_err(db_err)?;
        let status = match status_str.as_str() {
            "open" => SimulatedTradeStatus::Open,
            "closed" => SimulatedTradeStatus::Closed,
            _ => SimulatedTradeStatus::Canceled,
        };
        let exit_reason_str: Option<String> = row.try_get("exit_reason").map_err(db_err)?;
        let exit_reason = exit_reason_str.map(|s| match s.as_str() {
            "take_profit" => ExitReason::TakeProfit,
            "stop_loss" => ExitReason::StopLoss,
            "max_hold" => ExitReason::MaxHold,
            "manual" => ExitReason::Manual,
            _ => ExitReason::BalanceDepleted,
        });
        Ok(SimulatedTrade {
            id: row.try_get("id").map_err(db_err)?,
            strategy_id: row.try_get("strategy_id").map_err(db_err)?,
            token_id: row.try_get("token_id").map_err(db_err)?,
            simulation_run_id: row.try_get("simulation_run_id").map_err(db_err)?,
            entry_price: row.try_get("entry_price").map_err(db_err)?,
            entry_timestamp: row.try_get("entry_timestamp").map_err(db_err)?,
            position_size: row.try_get("position_size").map_err(db_err)?,
            entry_usd_market_cap: row.try_get("entry_usd_market_cap").map_err(db_err)?,
            exit_price: row.try_get("exit_price").map_err(db_err)?,
            exit_timestamp: row.try_get("exit_timestamp").map_err(db_err)?,
            exit_usd_market_cap: row.try_get("exit_usd_market_cap").map_err(db_err)?,
            profit_loss: row.try_get("profit_loss").map_err(db_err)?,
            exit_reason,
            status,
        })
    }

    fn row_to_run(row: &sqlx::postgres::PgRow) -> SimResult<SimulationRun> {
        let status_str: String = row.try_get("status").map_err(db_err)?;
        let status = match status_str.as_str() {
            "preparing" => RunStatus::Preparing,
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            _ => RunStatus::Failed,
        };
        Ok(SimulationRun {
            id: row.try_get("id").map_err(db_err)?,
            strategy_id: row.try_get("strategy_id").map_err(db_err)?,
            start_time: row.try_get("start_time").map_err(db_err)?,
            end_time: row.try_get("end_time").map_err(db_err)?,
            status,
            simulation_parameters: row.try_get("simulation_parameters").map_err(db_err)?,
        })
    }

    fn row_to_metric(row: &sqlx::postgres::PgRow) -> SimResult<StrategyMetric> {
        Ok(StrategyMetric {
            id: row.try_get("id").map_err(db_err)?,
            run_id: row.try_get("run_id").map_err(db_err)?,
            strategy_id: row.try_get("strategy_id").map_err(db_err)?,
            win_rate: row.try_get("win_rate").map_err(db_err)?,
            avg_profit: row.try_get("avg_profit").map_err(db_err)?,
            avg_loss: row.try_get("avg_loss").map_err(db_err)?,
            max_drawdown: row.try_get("max_drawdown").map_err(db_err)?,
            total_trades: row.try_get::<i64, _>("total_trades").map_err(db_err)? as u64,
            successful_trades: row.try_get::<i64, _>("successful_trades").map_err(db_err)? as u64,
            balance: row.try_get("balance").map_err(db_err)?,
            roi: row.try_get("roi").map_err(db_err)?,
            created_at: row.try_get("created_at").map_err(db_err)?,
        })
    }
}

fn db_err(e: sqlx::Error) -> SimError {
    SimError::TransientIO(e.to_string())
}

#[async_trait]
impl Store for PostgresStore {
    async fn upsert_token_by_mint(&self, token: Token) -> SimResult<Token> {
        let row = sqlx::query(
            r#"
            INSERT INTO tokens (id, mint_address, creator, name, symbol, market_cap, usd_market_cap, created_timestamp, complete)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (mint_address) DO UPDATE SET
                market_cap = EXCLUDED.market_cap,
                usd_market_cap = EXCLUDED.usd_market_cap,
                complete = EXCLUDED.complete
            RETURNING *
            "#,
        )
        .bind(token.id)
        .bind(&token.mint_address)
        .bind(&token.creator)
        .bind(&token.name)
        .bind(&token.symbol)
        .bind(token.market_cap)
        .bind(token.usd_market_cap)
        .bind(token.created_timestamp)
        .bind(token.complete)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Self::row_to_token(&row)
    }

    async fn get_token_by_mint(&self, mint: &str) -> SimResult<Option<Token>> {
        let row = sqlx::query("SELECT * FROM tokens WHERE mint_address = $1")
            .bind(mint)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::row_to_token).transpose()
    }

    async fn get_token_by_id(&self, id: Uuid) -> SimResult<Option<Token>> {
        let row = sqlx::query("SELECT * FROM tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::row_to_token).transpose()
    }

    async fn get_recent_tokens(&self, limit: usize) -> SimResult<Vec<Token>> {
        let rows = sqlx::query("SELECT * FROM tokens ORDER BY created_timestamp DESC LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::row_to_token).collect()
    }

    async fn get_filtered_tokens(
        &self,
        min_mcap_usd: Decimal,
        max_age_sec: i64,
        limit: usize,
    ) -> SimResult<Vec<Token>> {
        let rows = sqlx::query(
            "SELECT * FROM tokens WHERE usd_market_cap >= $1 AND created_timestamp >= (now() - ($2 || ' seconds')::interval) ORDER BY created_timestamp DESC LIMIT $3",
        )
        .bind(min_mcap_usd)
        .bind(max_age_sec.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(Self::row_to_token).collect()
    }

    async fn append_trade(&self, trade: Trade) -> SimResult<Trade> {
        let row = sqlx::query(
            r#"
            INSERT INTO trades (id, token_id, mint_address, signature, sol_amount, token_amount, is_buy, user_address, timestamp, market_cap, usd_market_cap)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (signature) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(trade.id)
        .bind(trade.token_id)
        .bind(&trade.mint_address)
        .bind(&trade.signature)
        .bind(trade.sol_amount)
        .bind(trade.token_amount)
        .bind(trade.is_buy)
        .bind(&trade.user_address)
        .bind(trade.timestamp)
        .bind(trade.market_cap)
        .bind(trade.usd_market_cap)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(r) => Self::row_to_trade(&r),
            None => Ok(trade),
        }
    }

    async fn get_trades_by_token(&self, token_id: Uuid, limit: usize) -> SimResult<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE token_id = $1 ORDER BY timestamp DESC LIMIT $2")
            .bind(token_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::row_to_trade).collect()
    }

    async fn create_strategy(&self, strategy: Strategy) -> SimResult<Strategy> {
        let config_json = serde_json::to_value(&strategy.config)?;
        let tags_json = serde_json::to_value(&strategy.tags)?;
        let row = sqlx::query(
            r#"
            INSERT INTO strategies (id, name, description, tags, config, complexity_score, risk_score, ai_enhanced, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(strategy.id)
        .bind(&strategy.name)
        .bind(&strategy.description)
        .bind(tags_json)
        .bind(config_json)
        .bind(strategy.complexity_score)
        .bind(strategy.risk_score)
        .bind(strategy.ai_enhanced)
        .bind(strategy.created_at)
        .bind(strategy.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Self::row_to_strategy(&row)
    }

    async fn get_strategy_by_id(&self, id: Uuid) -> SimResult<Option<Strategy>> {
        let row = sqlx::query("SELECT * FROM strategies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::row_to_strategy).transpose()
    }

    async fn list_public_strategies(&self, limit: usize, offset: usize) -> SimResult<Vec<Strategy>> {
        let rows = sqlx::query("SELECT * FROM strategies ORDER BY created_at DESC LIMIT $1 OFFSET $2")
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::row_to_strategy).collect()
    }

    async fn top_strategies(&self, criteria: TopCriteria, limit: usize) -> SimResult<Vec<Strategy>> {
        match criteria {
            TopCriteria::Performance => {
                let rows = sqlx::query(
                    r#"
                    SELECT s.* FROM strategies s
                    LEFT JOIN LATERAL (
                        SELECT * FROM strategy_metrics m WHERE m.strategy_id = s.id ORDER BY m.created_at DESC LIMIT 1
                    ) latest ON true
                    ORDER BY
                        CASE WHEN latest.total_trades IS NULL OR latest.total_trades = 0 THEN 1 ELSE 0 END,
                        (COALESCE(latest.roi, 0) * LEAST(1.0, COALESCE(latest.total_trades, 0) / 10.0)
                            + COALESCE(latest.win_rate, 0) * 0.1) DESC
                    LIMIT $1
                    "#,
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
                rows.iter().map(Self::row_to_strategy).collect()
            }
            TopCriteria::Votes | TopCriteria::Recent => {
                let rows = sqlx::query("SELECT * FROM strategies ORDER BY updated_at DESC LIMIT $1")
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_err)?;
                rows.iter().map(Self::row_to_strategy).collect()
            }
        }
    }

    async fn insert_open_trade(&self, trade: SimulatedTrade) -> SimResult<SimulatedTrade> {
        let row = sqlx::query(
            r#"
            INSERT INTO simulated_trades (id, strategy_id, token_id, simulation_run_id, entry_price, entry_timestamp, position_size, entry_usd_market_cap, status)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, 'open'
            WHERE NOT EXISTS (
                SELECT 1 FROM simulated_trades WHERE strategy_id = $2 AND token_id = $3 AND status = 'open'
            )
            RETURNING *
            "#,
        )
        .bind(trade.id)
        .bind(trade.strategy_id)
        .bind(trade.token_id)
        .bind(trade.simulation_run_id)
        .bind(trade.entry_price)
        .bind(trade.entry_timestamp)
        .bind(trade.position_size)
        .bind(trade.entry_usd_market_cap)
        .fetch_optional(&self.pool)
        .await;
        let conflict = || {
            SimError::StateConflict(format!(
                "open position already exists for strategy {} token {}",
                trade.strategy_id, trade.token_id
            ))
        };
        match row {
            Ok(Some(r)) => Self::row_to_simulated_trade(&r),
            Ok(None) => Err(conflict()),
            // A concurrent insert can win the race between our NOT EXISTS
            // check and the insert itself; the partial unique index turns
            // that race into a constraint violation instead of a lost update.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(conflict()),
            Err(e) => Err(db_err(e)),
        }
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
        let row = sqlx::query(
            r#"
            UPDATE simulated_trades
            SET status = 'closed', exit_price = $2, exit_timestamp = $3, exit_usd_market_cap = $4,
                profit_loss = $5, exit_reason = $6
            WHERE id = $1 AND status = 'open'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(exit_price)
        .bind(exit_timestamp)
        .bind(exit_usd_market_cap)
        .bind(profit_loss)
        .bind(exit_reason.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(r) => Self::row_to_simulated_trade(&r),
            None => Err(SimError::StateConflict(format!("simulated_trade {id} is not open"))),
        }
    }

    async fn get_open_trades_by_strategy(&self, strategy_id: Uuid) -> SimResult<Vec<SimulatedTrade>> {
        let rows = sqlx::query("SELECT * FROM simulated_trades WHERE strategy_id = $1 AND status = 'open'")
            .bind(strategy_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::row_to_simulated_trade).collect()
    }

    async fn get_closed_trades_by_strategy(
        &self,
        strategy_id: Uuid,
        limit: usize,
    ) -> SimResult<Vec<SimulatedTrade>> {
        let rows = sqlx::query(
            "SELECT * FROM simulated_trades WHERE strategy_id = $1 AND status = 'closed' ORDER BY exit_timestamp DESC LIMIT $2",
        )
        .bind(strategy_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(Self::row_to_simulated_trade).collect()
    }

    async fn create_run(&self, run: SimulationRun) -> SimResult<SimulationRun> {
        let status_str = match run.status {
            RunStatus::Preparing => "preparing",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        let row = sqlx::query(
            r#"
            INSERT INTO simulation_runs (id, strategy_id, start_time, end_time, status, simulation_parameters)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(run.id)
        .bind(run.strategy_id)
        .bind(run.start_time)
        .bind(run.end_time)
        .bind(status_str)
        .bind(&run.simulation_parameters)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Self::row_to_run(&row)
    }

    async fn update_run_status(&self, id: Uuid, status: RunStatus) -> SimResult<SimulationRun> {
        let status_str = match status {
            RunStatus::Preparing => "preparing",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        let ends_run = matches!(status, RunStatus::Completed | RunStatus::Failed);
        let row = sqlx::query(
            r#"
            UPDATE simulation_runs
            SET status = $2, end_time = CASE WHEN $3 THEN now() ELSE end_time END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status_str)
        .bind(ends_run)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(r) => Self::row_to_run(&r),
            None => Err(SimError::not_found(format!("simulation_run {id}"))),
        }
    }

    async fn get_runs_by_strategy(&self, strategy_id: Uuid) -> SimResult<Vec<SimulationRun>> {
        let rows = sqlx::query("SELECT * FROM simulation_runs WHERE strategy_id = $1 ORDER BY start_time DESC")
            .bind(strategy_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::row_to_run).collect()
    }

    async fn append_metric(&self, metric: StrategyMetric) -> SimResult<StrategyMetric> {
        let row = sqlx::query(
            r#"
            INSERT INTO strategy_metrics (id, run_id, strategy_id, win_rate, avg_profit, avg_loss, max_drawdown, total_trades, successful_trades, balance, roi, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(metric.id)
        .bind(metric.run_id)
        .bind(metric.strategy_id)
        .bind(metric.win_rate)
        .bind(metric.avg_profit)
        .bind(metric.avg_loss)
        .bind(metric.max_drawdown)
        .bind(metric.total_trades as i64)
        .bind(metric.successful_trades as i64)
        .bind(metric.balance)
        .bind(metric.roi)
        .bind(metric.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Self::row_to_metric(&row)
    }

    async fn latest_metric_by_strategy(&self, strategy_id: Uuid) -> SimResult<Option<StrategyMetric>> {
        let row = sqlx::query(
            "SELECT * FROM strategy_metrics WHERE strategy_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(strategy_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(Self::row_to_metric).transpose()
    }

    async fn append_event(&self, event: SimulationEventRow) -> SimResult<()> {
        sqlx::query(
            r#"
            INSERT INTO simulation_events (id, strategy_id, run_id, event_type, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.strategy_id)
        .bind(event.run_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn recent_events_by_strategy(&self, strategy_id: Uuid, limit: usize) -> SimResult<Vec<SimulationEventRow>> {
        let rows = sqlx::query(
            "SELECT * FROM simulation_events WHERE strategy_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(strategy_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter()
            .map(|row| {
                Ok(SimulationEventRow {
                    id: row.try_get("id").map_err(db_err)?,
                    strategy_id: row.try_get("strategy_id").map_err(db_err)?,
                    run_id: row.try_get("run_id").map_err(db_err)?,
                    event_type: row.try_get("event_type").map_err(db_err)?,
                    payload: row.try_get("payload").map_err(db_err)?,
                    created_at: row.try_get("created_at").map_err(db_err)?,
                })
            })
            .collect()
    }
}
