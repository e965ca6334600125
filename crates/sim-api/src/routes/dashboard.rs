//! Dashboard aggregation endpoints. Built entirely from the Store's and
//! Engine's existing read paths — no bespoke time-bucketed query layer.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use sim_types::SimError;

use crate::error::ApiResult;
use crate::state::AppState;

const CHART_TRADE_WINDOW: usize = 200;

#[derive(Debug, Deserialize)]
pub struct TimeframeQuery {
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
}

fn default_timeframe() -> String {
    "24h".to_string()
}

fn timeframe_duration(s: &str) -> Result<ChronoDuration, SimError> {
    match s {
        "24h" => Ok(ChronoDuration::hours(24)),
        "7d" => Ok(ChronoDuration::days(7)),
        "30d" => Ok(ChronoDuration::days(30)),
        other => Err(SimError::validation(format!("unknown timeframe '{other}'"))),
    }
}

async fn compute_stats(state: &AppState) -> ApiResult<Value> {
    let running = state.engine.get_running_simulations().await;
    let total_strategies = state.store.list_public_strategies(10_000, 0).await?.len();

    let mut total_closed = 0u64;
    let mut total_open = 0u64;
    let mut roi_sum = Decimal::ZERO;
    for summary in &running {
        total_closed += summary.closed_count;
        total_open += summary.open_count;
        roi_sum += summary.roi;
    }
    let avg_roi = if running.is_empty() {
        Decimal::ZERO
    } else {
        roi_sum / Decimal::from(running.len())
    };

    Ok(json!({
        "total_strategies": total_strategies,
        "running_simulations": running.len(),
        "total_closed_trades": total_closed,
        "total_open_trades": total_open,
        "average_roi": avg_roi,
    }))
}

async fn compute_charts(state: &AppState, timeframe: &str) -> ApiResult<Value> {
    let window = timeframe_duration(timeframe)?;
    let cutoff = Utc::now() - window;
    let running = state.engine.get_running_simulations().await;

    let mut series = Vec::with_capacity(running.len());
    for summary in running {
        let trades = state
            .store
            .get_closed_trades_by_strategy(summary.strategy_id, CHART_TRADE_WINDOW)
            .await?;
        let mut points: Vec<Value> = Vec::new();
        let mut cumulative = Decimal::ZERO;
        for trade in trades.into_iter().rev() {
            let Some(exit_at) = trade.exit_timestamp else { continue };
            if exit_at < cutoff {
                continue;
            }
            cumulative += trade.profit_loss.unwrap_or(Decimal::ZERO);
            points.push(json!({
                "timestamp": exit_at,
                "cumulative_profit": cumulative,
            }));
        }
        series.push(json!({
            "strategy_id": summary.strategy_id,
            "points": points,
        }));
    }

    Ok(json!({ "timeframe": timeframe, "series": series }))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    Ok(Json(compute_stats(&state).await?))
}

pub async fn charts(State(state): State<Arc<AppState>>, Query(q): Query<TimeframeQuery>) -> ApiResult<Json<Value>> {
    Ok(Json(compute_charts(&state, &q.timeframe).await?))
}

pub async fn complete(State(state): State<Arc<AppState>>, Query(q): Query<TimeframeQuery>) -> ApiResult<Json<Value>> {
    let stats = compute_stats(&state).await?;
    let charts = compute_charts(&state, &q.timeframe).await?;
    let running = state.engine.get_running_simulations().await;
    Ok(Json(json!({
        "stats": stats,
        "charts": charts,
        "running": running,
    })))
}
