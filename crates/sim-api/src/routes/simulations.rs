use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use sim_types::SimulationSummary;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn running(State(state): State<Arc<AppState>>) -> Json<Vec<SimulationSummary>> {
    Json(state.engine.get_running_simulations().await)
}

pub async fn summary(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Json<SimulationSummary>> {
    let summary = state.engine.get_simulation_summary(id).await?;
    Ok(Json(summary))
}
