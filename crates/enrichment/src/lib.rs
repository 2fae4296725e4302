//! ReplyLens Enrichment
//!
//! Fans comments out to the annotation oracle with a fixed in-flight limit and
//! joins on the whole set before handing results to persistence.

pub mod dispatcher;

pub use dispatcher::{EnrichProgress, EnrichmentDispatcher, EnrichmentFailure, EnrichmentOutcome};
