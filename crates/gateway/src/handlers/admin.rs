//! Storage statistics and operator reset

use axum::{extract::State, http::StatusCode, Json};

use crate::auth::Operator;
use crate::AppState;
use replylens_common::{db::StorageCounts, errors::Result};

/// Row counts across videos, comments and tags
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<StorageCounts>> {
    Ok(Json(state.repository.counts().await?))
}

/// Delete every stored row and reopen the run cooldown. Never part of a run.
pub async fn clear_data(_operator: Operator, State(state): State<AppState>) -> Result<StatusCode> {
    state.repository.clear_all().await?;
    state.pipeline.gate().reset();

    tracing::warn!("Operator reset completed");
    Ok(StatusCode::NO_CONTENT)
}
