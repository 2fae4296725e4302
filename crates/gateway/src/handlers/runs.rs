//! Pipeline run handlers

use axum::{extract::State, Json};
use serde::Deserialize;

use crate::pipeline::RunSummary;
use crate::AppState;
use replylens_common::errors::{AppError, Result};

/// Request to run the pipeline for one video
#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    /// Public video identifier
    pub bvid: String,

    /// Upstream session cookie
    pub credential: String,

    /// Comment pages to fetch; clamped to the configured maximum
    #[serde(default)]
    pub pages: Option<u32>,
}

/// Run the pipeline to completion and return its summary.
///
/// The run executes on its own task: a request timeout or a dropped client
/// stops waiting for the summary but never cancels enrichment or persistence.
/// Refused with 429 and `Retry-After` while the cooldown is open.
pub async fn start_run(
    State(state): State<AppState>,
    Json(request): Json<StartRunRequest>,
) -> Result<Json<RunSummary>> {
    let pipeline = state.pipeline.clone();
    let run = tokio::spawn(async move {
        pipeline
            .run(request.bvid.trim(), &request.credential, request.pages)
            .await
    });

    let summary = run.await.map_err(|e| AppError::Internal {
        message: format!("Pipeline task failed: {}", e),
    })??;

    Ok(Json(summary))
}
