use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use sim_types::SimError;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

const RECENT_EVENT_SCAN: usize = 50;

/// `GET /ai/analysis/:id`: the most recent `ai_analysis` event persisted
/// for this strategy.
pub async fn analysis(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<Json<serde_json::Value>> {
    let events = state.store.recent_events_by_strategy(id, RECENT_EVENT_SCAN).await?;
    let latest = events
        .into_iter()
        .find(|e| e.event_type == "ai_analysis")
        .ok_or_else(|| SimError::not_found(format!("ai analysis for strategy {id}")))?;
    Ok(Json(latest.payload))
}
