use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use sim_store::TopCriteria;
use sim_types::{SimError, Strategy, StrategyConfig};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    #[serde(default = "default_criteria")]
    pub criteria: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

fn default_criteria() -> String {
    "performance".to_string()
}

pub async fn list(State(state): State<Arc<AppState>>, Query(q): Query<ListQuery>) -> ApiResult<Json<Vec<Strategy>>> {
    let strategies = state.store.list_public_strategies(q.limit, q.offset).await?;
    Ok(Json(strategies))
}

pub async fn top(State(state): State<Arc<AppState>>, Query(q): Query<TopQuery>) -> ApiResult<Json<Vec<Strategy>>> {
    let criteria = TopCriteria::parse(&q.criteria)
        .ok_or_else(|| SimError::validation(format!("unknown criteria '{}'", q.criteria)))?;
    let strategies = state.store.top_strategies(criteria, q.limit).await?;
    Ok(Json(strategies))
}

pub async fn get(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let strategy = state
        .store
        .get_strategy_by_id(id)
        .await?
        .ok_or_else(|| SimError::not_found(format!("strategy {id}")))?;
    let metric = state.store.latest_metric_by_strategy(id).await?;
    Ok(Json(json!({
        "strategy": strategy,
        "latest_metric": metric,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateStrategyRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub config: StrategyConfig,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateStrategyRequest>,
) -> ApiResult<(StatusCode, Json<Strategy>)> {
    let mut strategy = Strategy::new(body.name, body.config).map_err(ApiError::from)?;
    strategy.description = body.description;
    strategy.tags = body.tags;
    let created = state.store.create_strategy(strategy).await?;
    Ok((StatusCode::CREATED, Json(created)))
}
