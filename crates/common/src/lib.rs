//! ReplyLens Common Library
//!
//! Shared code for all ReplyLens crates including:
//! - Domain types for videos, comments, and annotations
//! - Database entities, schema bootstrap, and the repository
//! - Annotation oracle abstraction
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod annotator;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod metrics;

// Re-export commonly used types
pub use annotator::Annotator;
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use domain::{Annotation, AnnotatedComment, Comment, VideoRef};
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default annotation model
pub const DEFAULT_ANNOTATION_MODEL: &str = "deepseek-chat";

/// Neutral sentiment used when no aggregate is available
pub const NEUTRAL_SENTIMENT: f64 = 0.5;
