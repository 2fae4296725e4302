//! Per-video read handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::AppState;
use replylens_common::{
    db::CommentReport,
    domain::SentimentLabel,
    errors::{AppError, Result},
};

/// Aggregate sentiment response
#[derive(Serialize)]
pub struct SentimentResponse {
    pub aid: i64,
    pub aggregate_sentiment: f64,
    pub label: SentimentLabel,
}

/// Analysis report response
#[derive(Serialize)]
pub struct ReportResponse {
    pub aid: i64,
    pub bvid: String,
    pub title: String,
    pub aggregate_sentiment: f64,
    pub comment_count: usize,
    pub comments: Vec<CommentReport>,
}

/// Storage-maintained aggregate; neutral when nothing is stored
pub async fn get_sentiment(
    State(state): State<AppState>,
    Path(aid): Path<i64>,
) -> Result<Json<SentimentResponse>> {
    let score = state.repository.aggregate_sentiment(aid).await?;

    Ok(Json(SentimentResponse {
        aid,
        aggregate_sentiment: score,
        label: SentimentLabel::from_score(score),
    }))
}

/// Every stored comment of a video with tags and label
pub async fn get_report(
    State(state): State<AppState>,
    Path(aid): Path<i64>,
) -> Result<Json<ReportResponse>> {
    let video = state
        .repository
        .find_video(aid)
        .await?
        .ok_or_else(|| AppError::VideoNotFound {
            id: aid.to_string(),
            status: -404,
        })?;

    let comments = state.repository.analysis_report(aid).await?;
    let aggregate_sentiment = state.repository.aggregate_sentiment(aid).await?;

    Ok(Json(ReportResponse {
        aid,
        bvid: video.bvid,
        title: video.title,
        aggregate_sentiment,
        comment_count: comments.len(),
        comments,
    }))
}
