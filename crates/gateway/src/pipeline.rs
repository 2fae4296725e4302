//! Pipeline orchestrator
//!
//! One run: validate → resolve metadata → store video → collect comments →
//! annotate → store batch → read aggregate. Runs are gated by the cooldown
//! and no transaction spans the enrichment phase.

use crate::run_gate::RunGate;
use chrono::{DateTime, Utc};
use replylens_common::annotator::Annotator;
use replylens_common::config::{AppConfig, UpstreamConfig};
use replylens_common::db::{Repository, TagLinkFailure};
use replylens_common::errors::Result;
use replylens_common::metrics::RunMetrics;
use replylens_common::VideoRef;
use replylens_enrichment::{EnrichmentDispatcher, EnrichmentFailure};
use replylens_ingestion::{
    identifier, metadata, CommentPaginator, IngestionError, PageStop, VideoSource,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// What a completed run did
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub video: VideoRef,
    pub pages_fetched: u32,
    pub page_stop: PageStop,
    /// Comments kept after noise filtering
    pub collected: usize,
    pub discarded: usize,
    pub annotated: usize,
    pub failed: usize,
    pub enrichment_failures: Vec<EnrichmentFailure>,
    pub persisted: usize,
    pub detached_parents: usize,
    pub tags_linked: usize,
    pub tag_failures: Vec<TagLinkFailure>,
    pub aggregate_sentiment: f64,
    pub duration_ms: u64,
}

/// Ingestion → enrichment → persistence for one video at a time
pub struct Pipeline {
    repository: Repository,
    source: Arc<dyn VideoSource>,
    paginator: CommentPaginator,
    dispatcher: EnrichmentDispatcher,
    gate: Arc<RunGate>,
    upstream: UpstreamConfig,
}

impl Pipeline {
    pub fn new(
        repository: Repository,
        source: Arc<dyn VideoSource>,
        annotator: Arc<dyn Annotator>,
        gate: Arc<RunGate>,
        config: &AppConfig,
    ) -> Self {
        Self {
            repository,
            paginator: CommentPaginator::from_config(source.clone(), &config.upstream),
            dispatcher: EnrichmentDispatcher::from_config(annotator, &config.enrichment),
            source,
            gate,
            upstream: config.upstream.clone(),
        }
    }

    pub fn gate(&self) -> &RunGate {
        &self.gate
    }

    /// Execute one full run
    #[instrument(skip(self, credential))]
    pub async fn run(&self, bvid: &str, credential: &str, pages: Option<u32>) -> Result<RunSummary> {
        let metrics = RunMetrics::start();

        // Input before the gate; a rejected input never consumes the window
        if let Err(e) = self.validate(bvid, credential) {
            metrics.finish("rejected");
            return Err(e.into());
        }
        if let Err(e) = self.gate.admit() {
            metrics.finish("throttled");
            return Err(e);
        }

        match self.execute(bvid, credential, pages, &metrics).await {
            Ok(summary) => {
                metrics.finish("success");
                Ok(summary)
            }
            Err(e) => {
                warn!(error = %e, "Pipeline run failed");
                metrics.finish("failed");
                Err(e)
            }
        }
    }

    fn validate(&self, bvid: &str, credential: &str) -> std::result::Result<(), IngestionError> {
        identifier::require_valid(bvid)?;
        identifier::validate_credential(credential, self.upstream.min_credential_len)
    }

    async fn execute(
        &self,
        bvid: &str,
        credential: &str,
        pages: Option<u32>,
        metrics: &RunMetrics,
    ) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let max_pages = self.upstream.effective_pages(pages);

        info!(run_id = %run_id, max_pages, "Pipeline run started");

        let video = metadata::fetch(self.source.as_ref(), bvid, credential).await?;
        self.repository.upsert_video(&video).await?;

        let collected = self.paginator.paginate(&video, credential, max_pages).await;

        let mut summary = RunSummary {
            run_id,
            started_at,
            pages_fetched: collected.pages_fetched,
            page_stop: collected.stop.clone(),
            collected: collected.comments.len(),
            discarded: collected.discarded,
            annotated: 0,
            failed: 0,
            enrichment_failures: Vec::new(),
            persisted: 0,
            detached_parents: 0,
            tags_linked: 0,
            tag_failures: Vec::new(),
            aggregate_sentiment: replylens_common::NEUTRAL_SENTIMENT,
            duration_ms: 0,
            video,
        };

        if collected.comments.is_empty() {
            info!("No comments collected, run ends after metadata");
            summary.aggregate_sentiment = self.repository.aggregate_sentiment(summary.video.aid).await?;
            summary.duration_ms = metrics.elapsed_ms();
            return Ok(summary);
        }

        let enriched = self
            .dispatcher
            .enrich_with_progress(
                collected.comments,
                &summary.video.title,
                &summary.video.description,
                |p| debug!(completed = p.completed, total = p.total, failed = p.failed, "Enrichment progress"),
            )
            .await;

        summary.annotated = enriched.annotated.len();
        summary.failed = enriched.failures.len();
        summary.enrichment_failures = enriched.failures;

        let batch = self
            .repository
            .persist_batch(summary.video.aid, &enriched.annotated)
            .await?;

        summary.persisted = batch.comments_written;
        summary.detached_parents = batch.detached_parents;
        summary.tags_linked = batch.tags.linked;
        summary.tag_failures = batch.tags.failures;
        summary.aggregate_sentiment = self.repository.aggregate_sentiment(summary.video.aid).await?;
        summary.duration_ms = metrics.elapsed_ms();

        info!(
            run_id = %run_id,
            collected = summary.collected,
            annotated = summary.annotated,
            failed = summary.failed,
            persisted = summary.persisted,
            aggregate = summary.aggregate_sentiment,
            duration_ms = summary.duration_ms,
            "Pipeline run completed"
        );

        Ok(summary)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use replylens_common::annotator::{AnnotationRequest, MockAnnotator};
    use replylens_common::errors::AppError;
    use replylens_common::{Annotation, DbPool};
    use replylens_ingestion::client::{ReplyContent, ReplyItem, ReplyMember};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub const BVID: &str = "BV1xx411c7mD";
    pub const AID: i64 = 170001;

    pub fn credential() -> String {
        format!("SESSDATA={}; bili_jct={}", "a".repeat(32), "b".repeat(32))
    }

    fn reply(rpid: i64, message: &str, nested: Vec<ReplyItem>) -> ReplyItem {
        ReplyItem {
            rpid: Some(rpid),
            content: Some(ReplyContent {
                message: Some(message.to_string()),
            }),
            member: Some(ReplyMember {
                uname: Some(format!("user{}", rpid)),
            }),
            replies: (!nested.is_empty()).then_some(nested),
        }
    }

    /// One page: five main comments with one reply each, plus a noise comment
    pub struct StubSource {
        pub metadata_calls: AtomicUsize,
        pub empty: bool,
    }

    impl StubSource {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                metadata_calls: AtomicUsize::new(0),
                empty: false,
            })
        }

        pub fn empty() -> Arc<Self> {
            Arc::new(Self {
                metadata_calls: AtomicUsize::new(0),
                empty: true,
            })
        }
    }

    #[async_trait]
    impl VideoSource for StubSource {
        async fn fetch_video(
            &self,
            bvid: &str,
            _credential: &str,
        ) -> std::result::Result<VideoRef, IngestionError> {
            self.metadata_calls.fetch_add(1, Ordering::SeqCst);
            Ok(VideoRef {
                bvid: bvid.to_string(),
                aid: AID,
                title: "测试视频".to_string(),
                description: "简介".to_string(),
                cover_url: None,
                owner_name: Some("UP主".to_string()),
                owner_face: None,
                view_count: 100,
                like_count: 10,
                danmaku_count: 1,
            })
        }

        async fn fetch_page(
            &self,
            _video: &VideoRef,
            page: u32,
            _credential: &str,
        ) -> std::result::Result<Vec<ReplyItem>, IngestionError> {
            if self.empty || page > 1 {
                return Ok(Vec::new());
            }
            let mut items: Vec<ReplyItem> = (0..5)
                .map(|i| {
                    let main = 1000 + i * 10;
                    reply(main, &format!("主评论{}", i), vec![reply(main + 1, &format!("回复{}", i), vec![])])
                })
                .collect();
            items.push(reply(9999, "@someone [doge]", vec![]));
            Ok(items)
        }
    }

    /// Fails every comment whose text is listed
    struct FailingAnnotator {
        failing: Vec<&'static str>,
    }

    #[async_trait]
    impl Annotator for FailingAnnotator {
        async fn annotate(&self, request: &AnnotationRequest) -> Result<Annotation> {
            if self.failing.contains(&request.content.as_str()) {
                return Err(AppError::Annotation {
                    message: "oracle error".to_string(),
                });
            }
            Ok(Annotation::new(0.9, 1.0, ["好评"]))
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    pub async fn pipeline_with(
        source: Arc<dyn VideoSource>,
        annotator: Arc<dyn Annotator>,
        gate: Arc<RunGate>,
    ) -> (Pipeline, Repository) {
        let mut config = AppConfig::default();
        config.upstream.page_delay_ms = 0;

        let repository = Repository::new(DbPool::in_memory().await.unwrap());
        let pipeline = Pipeline::new(repository.clone(), source, annotator, gate, &config);
        (pipeline, repository)
    }

    fn open_gate() -> Arc<RunGate> {
        Arc::new(RunGate::new(Duration::ZERO))
    }

    #[tokio::test]
    async fn test_full_run_persists_annotated_comments() {
        let (pipeline, repo) =
            pipeline_with(StubSource::new(), Arc::new(MockAnnotator::with_scores(1.0, 0.8)), open_gate()).await;

        let summary = pipeline.run(BVID, &credential(), Some(3)).await.unwrap();

        assert_eq!(summary.collected, 10);
        assert_eq!(summary.discarded, 1);
        assert_eq!(summary.annotated, 10);
        assert_eq!(summary.persisted, 10);
        assert_eq!(summary.detached_parents, 0);
        assert_eq!(summary.page_stop, PageStop::Exhausted { page: 2 });

        let counts = repo.counts().await.unwrap();
        assert_eq!(counts.video_count, 1);
        assert_eq!(counts.comment_count, 10);
        // Mock tags comments as "main" or "reply"
        assert_eq!(counts.tag_count, 2);

        let reply = repo.find_comment(1001).await.unwrap().unwrap();
        assert_eq!(reply.parent_id, Some(1000));
        assert_eq!(reply.sentiment_score, 0.99);
        assert!((summary.aggregate_sentiment - 0.99).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_partial_enrichment_failure() {
        let annotator = Arc::new(FailingAnnotator {
            failing: vec!["主评论2", "回复4"],
        });
        let (pipeline, repo) = pipeline_with(StubSource::new(), annotator, open_gate()).await;

        let summary = pipeline.run(BVID, &credential(), None).await.unwrap();

        assert_eq!(summary.collected, 10);
        assert_eq!(summary.annotated, 8);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.persisted, 8);
        assert_eq!(repo.counts().await.unwrap().comment_count, 8);

        // Reply whose main comment failed is kept without a parent link
        assert_eq!(summary.detached_parents, 1);
        assert_eq!(repo.find_comment(1021).await.unwrap().unwrap().parent_id, None);
        assert!(repo.find_comment(1020).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let (pipeline, repo) =
            pipeline_with(StubSource::new(), Arc::new(MockAnnotator::new()), open_gate()).await;

        pipeline.run(BVID, &credential(), None).await.unwrap();
        pipeline.run(BVID, &credential(), None).await.unwrap();

        let counts = repo.counts().await.unwrap();
        assert_eq!(counts.video_count, 1);
        assert_eq!(counts.comment_count, 10);
    }

    #[tokio::test]
    async fn test_empty_comments_end_after_metadata() {
        let (pipeline, repo) =
            pipeline_with(StubSource::empty(), Arc::new(MockAnnotator::new()), open_gate()).await;

        let summary = pipeline.run(BVID, &credential(), None).await.unwrap();

        assert_eq!(summary.collected, 0);
        assert_eq!(summary.persisted, 0);
        assert_eq!(summary.aggregate_sentiment, 0.5);
        assert_eq!(repo.counts().await.unwrap().video_count, 1);
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_network() {
        let source = StubSource::new();
        let (pipeline, _) =
            pipeline_with(source.clone(), Arc::new(MockAnnotator::new()), open_gate()).await;

        let err = pipeline.run("bv1xx411c7mD", &credential(), None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidIdentifier { .. }));

        let err = pipeline.run(BVID, "SESSDATA=short", None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredential { .. }));

        assert_eq!(source.metadata_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cooldown_between_runs() {
        let gate = Arc::new(RunGate::new(Duration::from_secs(10)));
        let (pipeline, _) = pipeline_with(StubSource::new(), Arc::new(MockAnnotator::new()), gate).await;

        // Rejected input does not consume the window
        assert!(pipeline.run("invalid", &credential(), None).await.is_err());
        pipeline.run(BVID, &credential(), None).await.unwrap();

        let err = pipeline.run(BVID, &credential(), None).await.unwrap_err();
        match err {
            AppError::Throttled { retry_after } => {
                assert!(retry_after <= Duration::from_secs(10));
                assert!(retry_after > Duration::from_secs(5));
            }
            other => panic!("expected throttle, got {:?}", other),
        }

        pipeline.gate().reset();
        tokio_test::assert_ok!(pipeline.run(BVID, &credential(), None).await);
    }
}
