//! Ingestion error types

use replylens_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Invalid video identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Video {bvid} not found (status {code})")]
    NotFound { bvid: String, code: i64 },

    #[error("Upstream rejected page {page}: status {code}")]
    PageRejected { page: u32, code: i64 },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Malformed upstream response: {0}")]
    Decode(String),
}

impl From<IngestionError> for AppError {
    fn from(e: IngestionError) -> Self {
        match e {
            IngestionError::InvalidIdentifier(id) => AppError::InvalidIdentifier { id },
            IngestionError::InvalidCredential(message) => AppError::InvalidCredential { message },
            IngestionError::NotFound { bvid, code } => AppError::VideoNotFound { id: bvid, status: code },
            other => AppError::Upstream {
                message: other.to_string(),
            },
        }
    }
}
