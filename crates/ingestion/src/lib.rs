//! ReplyLens Ingestion
//!
//! Everything between a public video identifier and a flat list of cleaned
//! comments:
//! 1. Validates the identifier and credential
//! 2. Resolves video metadata
//! 3. Walks comment pages sequentially, flattening one level of replies
//! 4. Drops noise comments

pub mod cleaner;
pub mod client;
pub mod errors;
pub mod identifier;
pub mod metadata;
pub mod paginator;

pub use client::{BilibiliClient, ReplyItem, VideoSource};
pub use errors::IngestionError;
pub use identifier::{validate, validate_credential};
pub use paginator::{CommentPaginator, PageStop, PaginationOutcome};
