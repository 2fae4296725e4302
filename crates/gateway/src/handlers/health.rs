//! Liveness and readiness

use axum::{extract::State, http::StatusCode, Json};
use replylens_common::db::StorageCounts;
use serde::Serialize;
use std::time::Instant;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness of the store plus the pipeline settings a run would use
#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub store: StoreCheck,
    pub enrichment: EnrichmentInfo,
    pub pipeline: PipelineInfo,
}

#[derive(Serialize)]
pub struct StoreCheck {
    pub up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<StorageCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct EnrichmentInfo {
    pub model: String,
    pub max_in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct PipelineInfo {
    pub cooldown_secs: u64,
    pub default_pages: u32,
    pub max_pages: u32,
    pub operator_routes: bool,
}

/// Process is up
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: replylens_common::VERSION,
    })
}

/// Store reachable; 503 otherwise
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let start = Instant::now();

    let store = match state.repository.ping().await {
        Ok(()) => StoreCheck {
            up: true,
            latency_ms: Some(start.elapsed().as_millis() as u64),
            counts: state.repository.counts().await.ok(),
            error: None,
        },
        Err(e) => StoreCheck {
            up: false,
            latency_ms: None,
            counts: None,
            error: Some(e.to_string()),
        },
    };

    let config = &state.config;
    let status = if store.up { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    let body = ReadyResponse {
        status: if store.up { "ready" } else { "not_ready" },
        store,
        enrichment: EnrichmentInfo {
            model: state.annotator_model.to_string(),
            max_in_flight: config.enrichment.max_in_flight,
            call_timeout_ms: config.enrichment.call_timeout_ms,
        },
        pipeline: PipelineInfo {
            cooldown_secs: config.pipeline.cooldown_secs,
            default_pages: config.upstream.default_pages,
            max_pages: config.upstream.max_pages,
            operator_routes: config.admin_token().is_some(),
        },
    };

    (status, Json(body))
}
