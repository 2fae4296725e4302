//! Enrichment dispatcher
//!
//! Every comment becomes one independent oracle call. At most `max_in_flight`
//! calls run at once; the dispatcher returns only after every call has
//! resolved. A failed call drops that comment and nothing else.

use replylens_common::annotator::{AnnotationRequest, Annotator};
use replylens_common::config::EnrichmentConfig;
use replylens_common::errors::AppError;
use replylens_common::{AnnotatedComment, Annotation, Comment};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Default number of concurrent oracle calls
pub const DEFAULT_MAX_IN_FLIGHT: usize = 15;

/// Snapshot reported after each call resolves, successful or not
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnrichProgress {
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// A comment that could not be annotated
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentFailure {
    /// `None` only when the task itself died before reporting back
    pub rpid: Option<i64>,
    pub error: String,
}

/// Completed batch: the annotated subset plus what was dropped
#[derive(Debug, Default)]
pub struct EnrichmentOutcome {
    pub annotated: Vec<AnnotatedComment>,
    pub failures: Vec<EnrichmentFailure>,
}

impl EnrichmentOutcome {
    pub fn total(&self) -> usize {
        self.annotated.len() + self.failures.len()
    }
}

/// Bounded fan-out to the annotation oracle
pub struct EnrichmentDispatcher {
    annotator: Arc<dyn Annotator>,
    max_in_flight: usize,
    call_timeout: Option<Duration>,
}

impl EnrichmentDispatcher {
    pub fn new(annotator: Arc<dyn Annotator>, max_in_flight: usize) -> Self {
        Self {
            annotator,
            max_in_flight: max_in_flight.max(1),
            call_timeout: None,
        }
    }

    pub fn from_config(annotator: Arc<dyn Annotator>, config: &EnrichmentConfig) -> Self {
        Self::new(annotator, config.max_in_flight).with_call_timeout(config.call_timeout())
    }

    /// Cap each oracle call; an expired call counts as that item's failure
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Annotate all comments without progress reporting
    pub async fn enrich(
        &self,
        comments: Vec<Comment>,
        video_title: &str,
        video_description: &str,
    ) -> EnrichmentOutcome {
        self.enrich_with_progress(comments, video_title, video_description, |_| {})
            .await
    }

    /// Annotate all comments, calling `on_progress` once per resolved call
    #[instrument(skip_all, fields(total = comments.len(), max_in_flight = self.max_in_flight))]
    pub async fn enrich_with_progress<F>(
        &self,
        comments: Vec<Comment>,
        video_title: &str,
        video_description: &str,
        mut on_progress: F,
    ) -> EnrichmentOutcome
    where
        F: FnMut(EnrichProgress),
    {
        let total = comments.len();
        let mut outcome = EnrichmentOutcome::default();
        if total == 0 {
            return outcome;
        }

        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let title: Arc<str> = Arc::from(video_title);
        let description: Arc<str> = Arc::from(video_description);
        let mut tasks = JoinSet::new();

        for comment in comments {
            let semaphore = semaphore.clone();
            let annotator = self.annotator.clone();
            let title = title.clone();
            let description = description.clone();
            let call_timeout = self.call_timeout;

            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        let request = AnnotationRequest {
                            content: comment.content.clone(),
                            video_title: title.to_string(),
                            video_description: description.to_string(),
                            is_reply: comment.is_reply(),
                        };
                        annotate_one(annotator.as_ref(), &request, call_timeout).await
                    }
                    Err(_) => Err(AppError::Internal {
                        message: "enrichment pool closed".to_string(),
                    }),
                };
                (comment, result)
            });
        }

        // Join barrier: nothing is returned until every submitted call resolves
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((comment, Ok(annotation))) => {
                    debug!(rpid = comment.rpid, sentiment = annotation.sentiment, "Comment annotated");
                    outcome.annotated.push(AnnotatedComment { comment, annotation });
                }
                Ok((comment, Err(e))) => {
                    warn!(rpid = comment.rpid, error = %e, "Annotation failed, dropping comment");
                    outcome.failures.push(EnrichmentFailure {
                        rpid: Some(comment.rpid),
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Annotation task aborted");
                    outcome.failures.push(EnrichmentFailure {
                        rpid: None,
                        error: e.to_string(),
                    });
                }
            }

            on_progress(EnrichProgress {
                completed: outcome.total(),
                total,
                succeeded: outcome.annotated.len(),
                failed: outcome.failures.len(),
            });
        }

        info!(
            succeeded = outcome.annotated.len(),
            failed = outcome.failures.len(),
            "Enrichment finished"
        );

        outcome
    }
}

async fn annotate_one(
    annotator: &dyn Annotator,
    request: &AnnotationRequest,
    call_timeout: Option<Duration>,
) -> Result<Annotation, AppError> {
    let started = Instant::now();

    let result = match call_timeout {
        Some(limit) => tokio::time::timeout(limit, annotator.annotate(request))
            .await
            .unwrap_or_else(|_| {
                Err(AppError::AnnotationTimeout {
                    timeout_ms: limit.as_millis() as u64,
                })
            }),
        None => annotator.annotate(request).await,
    };

    replylens_common::metrics::record_annotation(
        started.elapsed().as_secs_f64(),
        annotator.model_name(),
        result.is_ok(),
    );

    result
}
