//! Operator authorization for destructive routes

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use replylens_common::errors::{AppError, Result};

use crate::AppState;

/// Proof that the request carried the configured operator bearer token
#[derive(Debug, Clone, Copy)]
pub struct Operator;

/// Extract the token from an `Authorization: Bearer ...` value
fn bearer_token(value: &str) -> Option<&str> {
    value.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for Operator {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        // Routes using this extractor are only mounted with a token configured
        let expected = state.config.admin_token().ok_or_else(|| AppError::Forbidden {
            message: "Operator routes are disabled".to_string(),
        })?;

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing operator bearer token".to_string(),
            })?;

        if token != expected {
            tracing::warn!("Operator request with wrong token");
            return Err(AppError::Forbidden {
                message: "Invalid operator token".to_string(),
            });
        }

        Ok(Operator)
    }
}
