use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use sim_types::{SimError, Strategy};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct CreateStrategyTrigger {
    #[serde(default)]
    pub prompt: Option<String>,
}

/// `POST /trigger/create-strategy`: one-off AI-generated strategy,
/// independent of the scheduler's periodic top-N-driven cycle.
pub async fn create_strategy(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateStrategyTrigger>,
) -> ApiResult<Json<Strategy>> {
    let examples = state.store.top_strategies(sim_store::TopCriteria::Performance, 5).await?;
    let prompt = body.prompt.unwrap_or_else(|| {
        "Design a new pump.fun momentum strategy based on current top performers.".to_string()
    });
    let metadata = json!({
        "examples": examples.iter().map(|s| json!({"name": s.name, "config": s.config})).collect::<Vec<_>>(),
    });

    let generated = state.ai.generate_strategy(&prompt, metadata).await?;
    let mut strategy = Strategy::new(
        generated.name.unwrap_or_else(|| format!("ai-strategy-{}", Uuid::new_v4())),
        generated.config,
    )?;
    strategy.ai_enhanced = true;
    strategy.description = generated.description;
    let created = state.store.create_strategy(strategy).await?;
    Ok(Json(created))
}

/// `POST /trigger/simulate/:id` — restart semantics: stop-if-running,
/// then start a fresh `SimulationRun`.
pub async fn simulate(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    match state.engine.stop_simulation(id).await {
        Ok(()) | Err(SimError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }
    state.engine.start_simulation(id).await?;
    Ok(Json(json!({ "strategy_id": id, "restarted": true })))
}

pub async fn stop(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    state.engine.stop_simulation(id).await?;
    Ok(Json(json!({ "strategy_id": id, "stopped": true })))
}

pub async fn status(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let status = state.engine.get_simulation_status(id).await?;
    Ok(Json(json!({ "running": status.running })))
}

/// `POST /trigger/analyze`: runs one performance-analysis cycle
/// immediately, outside its normal interval.
pub async fn analyze(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    state.scheduler.trigger_performance_analysis().await;
    Ok(Json(json!({ "triggered": true })))
}
