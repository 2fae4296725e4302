//! Domain types shared across the ingestion, enrichment and persistence stages.
//!
//! A [`Comment`] is produced by the paginator, gains an [`Annotation`] in the
//! dispatcher, and is written by the repository as an [`AnnotatedComment`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lowest sentiment value ever written to storage
pub const SENTIMENT_FLOOR: f64 = 0.01;

/// Highest sentiment value ever written to storage
pub const SENTIMENT_CEILING: f64 = 0.99;

/// Score at or above which a comment is labelled positive
pub const POSITIVE_THRESHOLD: f64 = 0.75;

/// Score at or below which a comment is labelled negative
pub const NEGATIVE_THRESHOLD: f64 = 0.25;

/// Video metadata resolved from the public identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRef {
    /// Public identifier (`BV` + 10 alphanumerics)
    pub bvid: String,

    /// Internal numeric id used for comment queries
    pub aid: i64,

    pub title: String,
    pub description: String,
    pub cover_url: Option<String>,
    pub owner_name: Option<String>,
    pub owner_face: Option<String>,
    pub view_count: i64,
    pub like_count: i64,
    pub danmaku_count: i64,
}

/// A cleaned comment produced by flattening one page of replies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub rpid: i64,

    /// Internal id of the owning video
    pub aid: i64,

    /// `None` for a main comment, otherwise the enclosing main comment's rpid
    pub parent_rpid: Option<i64>,

    pub author_name: String,
    pub content: String,
}

impl Comment {
    /// Whether this comment is a nested reply rather than a main comment
    pub fn is_reply(&self) -> bool {
        self.parent_rpid.is_some()
    }

    pub fn kind(&self) -> CommentKind {
        if self.is_reply() {
            CommentKind::Reply
        } else {
            CommentKind::Main
        }
    }
}

/// Oracle output attached to a comment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Raw sentiment score as returned by the oracle
    pub sentiment: f64,

    /// Relevance to the video, always within [0, 1]
    pub relevance: f64,

    /// Distinct, trimmed, non-empty tag names
    pub tags: BTreeSet<String>,
}

impl Annotation {
    /// Build an annotation, normalizing relevance and the tag set.
    ///
    /// Non-finite scores fall back to neutral; duplicate and blank tags are dropped.
    pub fn new<I, S>(sentiment: f64, relevance: f64, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sentiment = if sentiment.is_finite() { sentiment } else { crate::NEUTRAL_SENTIMENT };
        let relevance = if relevance.is_finite() {
            relevance.clamp(0.0, 1.0)
        } else {
            crate::NEUTRAL_SENTIMENT
        };

        let tags = tags
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        Self { sentiment, relevance, tags }
    }

    /// Sentiment as it is persisted
    pub fn stored_sentiment(&self) -> f64 {
        clamp_sentiment(self.sentiment)
    }
}

/// A comment together with its successful annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedComment {
    pub comment: Comment,
    pub annotation: Annotation,
}

/// Clamp a sentiment score into [0.01, 0.99].
///
/// Downstream weighting degenerates on exact 0 or 1.
pub fn clamp_sentiment(score: f64) -> f64 {
    if !score.is_finite() {
        return crate::NEUTRAL_SENTIMENT;
    }
    score.clamp(SENTIMENT_FLOOR, SENTIMENT_CEILING)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentKind {
    Main,
    Reply,
}

/// Coarse sentiment bucket used by the analysis report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn from_score(score: f64) -> Self {
        if score >= POSITIVE_THRESHOLD {
            SentimentLabel::Positive
        } else if score <= NEGATIVE_THRESHOLD {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }
}
