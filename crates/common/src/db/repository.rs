//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations
//! with proper error handling and transaction support.

use crate::db::models::*;
use crate::db::schema::integrity_toggles;
use crate::db::DbPool;
use crate::domain::{AnnotatedComment, CommentKind, SentimentLabel, VideoRef};
use crate::errors::{AppError, Result};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

/// Rows per INSERT statement; keeps bound parameters under SQLite's limit
const COMMENT_CHUNK_SIZE: usize = 500;

/// Outcome of one `persist_batch` call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// Comment rows inserted or updated
    pub comments_written: usize,

    /// Replies whose main comment was neither in the batch nor stored
    pub detached_parents: usize,

    pub tags: TagLinkReport,
}

/// Aggregate result of best-effort tag linking
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagLinkReport {
    pub linked: usize,
    pub failures: Vec<TagLinkFailure>,
}

/// A single tag that could not be stored or linked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagLinkFailure {
    pub rpid: i64,
    pub tag: String,
    pub error: String,
}

/// Row counts across the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCounts {
    pub video_count: u64,
    pub comment_count: u64,
    pub tag_count: u64,
}

/// One line of the per-video analysis report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentReport {
    pub rpid: i64,
    pub parent_id: Option<i64>,
    pub kind: CommentKind,
    pub uname: String,
    pub content: String,
    pub sentiment_score: f64,
    pub relevance_score: f64,
    pub label: SentimentLabel,
    pub tags_display: String,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Video Operations
    // ========================================================================

    /// Insert a video, or overwrite its display fields when it already exists
    #[instrument(skip(self, video), fields(aid = video.aid, bvid = %video.bvid))]
    pub async fn upsert_video(&self, video: &VideoRef) -> Result<()> {
        let model = VideoActiveModel {
            video_id: Set(video.aid),
            bvid: Set(video.bvid.clone()),
            title: Set(video.title.clone()),
            description: Set(video.description.clone()),
            cover_url: Set(video.cover_url.clone()),
            owner_name: Set(video.owner_name.clone()),
            owner_face: Set(video.owner_face.clone()),
            view_count: Set(video.view_count),
            like_count: Set(video.like_count),
            danmaku_count: Set(video.danmaku_count),
            updated_at: Set(chrono::Utc::now()),
            ..Default::default()
        };

        VideoEntity::insert(model)
            .on_conflict(
                OnConflict::column(VideoColumn::VideoId)
                    .update_columns([
                        VideoColumn::Title,
                        VideoColumn::Description,
                        VideoColumn::CoverUrl,
                        VideoColumn::OwnerName,
                        VideoColumn::OwnerFace,
                        VideoColumn::ViewCount,
                        VideoColumn::LikeCount,
                        VideoColumn::DanmakuCount,
                        VideoColumn::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.conn())
            .await?;

        debug!("Video metadata stored");
        Ok(())
    }

    /// Find video by internal id
    pub async fn find_video(&self, aid: i64) -> Result<Option<Video>> {
        VideoEntity::find_by_id(aid)
            .one(self.conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Comment Operations
    // ========================================================================

    /// Write a batch of annotated comments for one video.
    ///
    /// Comment rows are all-or-nothing inside one transaction with foreign-key
    /// checks held until every row is written. Rows are keyed by `rpid`: the
    /// first write supplies identity fields, later writes only replace the two
    /// scores. Tags are linked after commit; a failing tag is reported and
    /// never undoes comment rows.
    #[instrument(skip(self, batch), fields(aid = aid, batch_size = batch.len()))]
    pub async fn persist_batch(&self, aid: i64, batch: &[AnnotatedComment]) -> Result<BatchReport> {
        if batch.is_empty() {
            return Ok(BatchReport::default());
        }

        // Last write wins for repeated rpids; a single upsert cannot touch a row twice
        let mut order: Vec<i64> = Vec::with_capacity(batch.len());
        let mut latest: HashMap<i64, &AnnotatedComment> = HashMap::with_capacity(batch.len());
        for item in batch {
            if latest.insert(item.comment.rpid, item).is_none() {
                order.push(item.comment.rpid);
            }
        }

        let txn = self.conn().begin().await?;
        let (relax, restore) = integrity_toggles(txn.get_database_backend());

        // Parents outside this batch must already be stored under the same video
        let missing_parents: Vec<i64> = latest
            .values()
            .filter_map(|item| item.comment.parent_rpid)
            .filter(|parent| !latest.contains_key(parent))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let stored_parents: HashSet<i64> = if missing_parents.is_empty() {
            HashSet::new()
        } else {
            CommentEntity::find()
                .select_only()
                .column(CommentColumn::Rpid)
                .filter(CommentColumn::VideoId.eq(aid))
                .filter(CommentColumn::Rpid.is_in(missing_parents.clone()))
                .into_tuple::<i64>()
                .all(&txn)
                .await?
                .into_iter()
                .collect()
        };

        let mut detached_parents = 0;
        let rows: Vec<CommentActiveModel> = order
            .iter()
            .filter_map(|rpid| latest.get(rpid))
            .map(|item| {
                let comment = &item.comment;
                let parent_id = comment.parent_rpid.filter(|parent| {
                    let present = latest.contains_key(parent) || stored_parents.contains(parent);
                    if !present {
                        detached_parents += 1;
                        warn!(rpid = comment.rpid, parent = *parent, "Parent comment absent, storing reply unlinked");
                    }
                    present
                });

                CommentActiveModel {
                    rpid: Set(comment.rpid),
                    video_id: Set(aid),
                    parent_id: Set(parent_id),
                    uname: Set(comment.author_name.clone()),
                    content: Set(comment.content.clone()),
                    sentiment_score: Set(item.annotation.stored_sentiment()),
                    relevance_score: Set(item.annotation.relevance),
                }
            })
            .collect();

        let comments_written = rows.len();

        txn.execute_unprepared(relax).await?;

        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let chunk: Vec<CommentActiveModel> = rows.by_ref().take(COMMENT_CHUNK_SIZE).collect();
            CommentEntity::insert_many(chunk)
                .on_conflict(
                    OnConflict::column(CommentColumn::Rpid)
                        .update_columns([CommentColumn::SentimentScore, CommentColumn::RelevanceScore])
                        .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;
        }

        txn.execute_unprepared(restore).await?;
        txn.commit().await?;

        crate::metrics::record_persisted(comments_written);

        let tags = self.link_tags(order.iter().filter_map(|rpid| latest.get(rpid).copied())).await;

        info!(
            comments = comments_written,
            detached_parents,
            tags_linked = tags.linked,
            tag_failures = tags.failures.len(),
            "Comment batch persisted"
        );

        Ok(BatchReport {
            comments_written,
            detached_parents,
            tags,
        })
    }

    async fn link_tags<'a>(&self, items: impl Iterator<Item = &'a AnnotatedComment>) -> TagLinkReport {
        let mut report = TagLinkReport::default();

        for item in items {
            for tag in &item.annotation.tags {
                match self.link_tag(item.comment.rpid, tag).await {
                    Ok(_) => report.linked += 1,
                    Err(e) => {
                        warn!(rpid = item.comment.rpid, tag = %tag, error = %e, "Tag link failed");
                        crate::metrics::record_tag_link_failure();
                        report.failures.push(TagLinkFailure {
                            rpid: item.comment.rpid,
                            tag: tag.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        report
    }

    /// Insert the tag if absent, then link it to the comment if not yet linked
    async fn link_tag(&self, rpid: i64, name: &str) -> Result<i32> {
        TagEntity::insert(TagActiveModel {
            tag_name: Set(name.to_string()),
            ..Default::default()
        })
        .on_conflict(OnConflict::column(TagColumn::TagName).do_nothing().to_owned())
        .exec_without_returning(self.conn())
        .await?;

        let tag = TagEntity::find()
            .filter(TagColumn::TagName.eq(name))
            .one(self.conn())
            .await?
            .ok_or_else(|| AppError::Internal {
                message: format!("Tag '{}' missing after insert", name),
            })?;

        CommentTagEntity::insert(CommentTagActiveModel {
            rpid: Set(rpid),
            tag_id: Set(tag.tag_id),
        })
        .on_conflict(
            OnConflict::columns([CommentTagColumn::Rpid, CommentTagColumn::TagId])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(self.conn())
        .await?;

        Ok(tag.tag_id)
    }

    /// Find a stored comment by rpid
    pub async fn find_comment(&self, rpid: i64) -> Result<Option<StoredComment>> {
        CommentEntity::find_by_id(rpid)
            .one(self.conn())
            .await
            .map_err(Into::into)
    }

    /// Tag names linked to a comment, sorted
    pub async fn tags_for_comment(&self, rpid: i64) -> Result<Vec<String>> {
        let mut names: Vec<String> = TagEntity::find()
            .inner_join(CommentEntity)
            .filter(CommentColumn::Rpid.eq(rpid))
            .all(self.conn())
            .await?
            .into_iter()
            .map(|t| t.tag_name)
            .collect();
        names.sort();
        Ok(names)
    }

    // ========================================================================
    // Read Side
    // ========================================================================

    /// Storage-maintained weighted sentiment for a video, neutral when absent
    pub async fn aggregate_sentiment(&self, aid: i64) -> Result<f64> {
        let stored: Option<Option<f64>> = VideoEntity::find_by_id(aid)
            .select_only()
            .column(VideoColumn::AvgSentiment)
            .into_tuple()
            .one(self.conn())
            .await?;

        Ok(stored
            .flatten()
            .filter(|s| s.is_finite())
            .map(|s| s.clamp(0.0, 1.0))
            .unwrap_or(crate::NEUTRAL_SENTIMENT))
    }

    /// Every stored comment of a video with its tags and sentiment label
    pub async fn analysis_report(&self, aid: i64) -> Result<Vec<CommentReport>> {
        let rows = CommentEntity::find()
            .filter(CommentColumn::VideoId.eq(aid))
            .order_by_asc(CommentColumn::Rpid)
            .find_with_related(TagEntity)
            .all(self.conn())
            .await?;

        Ok(rows
            .into_iter()
            .map(|(comment, tags)| {
                let mut names: Vec<String> = tags.into_iter().map(|t| t.tag_name).collect();
                names.sort();

                CommentReport {
                    rpid: comment.rpid,
                    parent_id: comment.parent_id,
                    kind: if comment.is_reply() { CommentKind::Reply } else { CommentKind::Main },
                    label: SentimentLabel::from_score(comment.sentiment_score),
                    uname: comment.uname,
                    content: comment.content,
                    sentiment_score: comment.sentiment_score,
                    relevance_score: comment.relevance_score,
                    tags_display: names.join(","),
                }
            })
            .collect())
    }

    /// Row counts for videos, comments and tags
    pub async fn counts(&self) -> Result<StorageCounts> {
        Ok(StorageCounts {
            video_count: VideoEntity::find().count(self.conn()).await?,
            comment_count: CommentEntity::find().count(self.conn()).await?,
            tag_count: TagEntity::find().count(self.conn()).await?,
        })
    }

    /// Delete every row. Operator reset only, never called by the pipeline.
    pub async fn clear_all(&self) -> Result<()> {
        let txn = self.conn().begin().await?;

        CommentTagEntity::delete_many().exec(&txn).await?;
        CommentEntity::delete_many().exec(&txn).await?;
        TagEntity::delete_many().exec(&txn).await?;
        VideoEntity::delete_many().exec(&txn).await?;

        txn.commit().await?;
        warn!("All stored data cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Annotation, Comment};

    fn video(aid: i64) -> VideoRef {
        VideoRef {
            bvid: "BV1xx411c7mD".to_string(),
            aid,
            title: "测试视频".to_string(),
            description: "简介".to_string(),
            cover_url: Some("https://i0.hdslb.com/cover.jpg".to_string()),
            owner_name: Some("UP主".to_string()),
            owner_face: None,
            view_count: 1000,
            like_count: 100,
            danmaku_count: 10,
        }
    }

    fn annotated(rpid: i64, parent: Option<i64>, score: f64, tags: &[&str]) -> AnnotatedComment {
        AnnotatedComment {
            comment: Comment {
                rpid,
                aid: 42,
                parent_rpid: parent,
                author_name: format!("user{}", rpid),
                content: format!("评论内容{}", rpid),
            },
            annotation: Annotation::new(score, 0.8, tags.iter().copied()),
        }
    }

    async fn repo_with_video() -> Repository {
        let repo = Repository::new(DbPool::in_memory().await.unwrap());
        repo.upsert_video(&video(42)).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn test_upsert_video_overwrites_display_fields() {
        let repo = repo_with_video().await;

        let mut updated = video(42);
        updated.title = "新标题".to_string();
        updated.description = "新简介".to_string();
        updated.view_count = 2000;
        repo.upsert_video(&updated).await.unwrap();

        let stored = repo.find_video(42).await.unwrap().unwrap();
        assert_eq!(stored.title, "新标题");
        assert_eq!(stored.description, "新简介");
        assert_eq!(stored.view_count, 2000);
        assert_eq!(repo.counts().await.unwrap().video_count, 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let repo = repo_with_video().await;
        let report = repo.persist_batch(42, &[]).await.unwrap();
        assert_eq!(report.comments_written, 0);
        assert_eq!(repo.counts().await.unwrap().comment_count, 0);
    }

    #[tokio::test]
    async fn test_sentiment_is_clamped_on_write() {
        let repo = repo_with_video().await;
        let batch = vec![
            annotated(1, None, 0.0, &[]),
            annotated(2, None, 1.0, &[]),
            annotated(3, None, 0.5, &[]),
        ];
        repo.persist_batch(42, &batch).await.unwrap();

        assert_eq!(repo.find_comment(1).await.unwrap().unwrap().sentiment_score, 0.01);
        assert_eq!(repo.find_comment(2).await.unwrap().unwrap().sentiment_score, 0.99);
        assert_eq!(repo.find_comment(3).await.unwrap().unwrap().sentiment_score, 0.5);
    }

    #[tokio::test]
    async fn test_repeated_batch_updates_scores_only() {
        let repo = repo_with_video().await;
        let first = vec![annotated(10, None, 0.2, &["剧情"]), annotated(11, Some(10), 0.3, &[])];
        repo.persist_batch(42, &first).await.unwrap();

        let mut second = vec![annotated(10, None, 0.9, &["剧情"]), annotated(11, Some(10), 0.7, &[])];
        second[0].comment.content = "被修改的内容".to_string();
        second[0].annotation.relevance = 0.4;
        repo.persist_batch(42, &second).await.unwrap();

        let counts = repo.counts().await.unwrap();
        assert_eq!(counts.comment_count, 2);
        assert_eq!(counts.tag_count, 1);

        let main = repo.find_comment(10).await.unwrap().unwrap();
        assert_eq!(main.sentiment_score, 0.9);
        assert_eq!(main.relevance_score, 0.4);
        assert_eq!(main.content, "评论内容10");
        assert_eq!(repo.find_comment(11).await.unwrap().unwrap().parent_id, Some(10));
    }

    #[tokio::test]
    async fn test_reply_before_parent_in_batch() {
        let repo = repo_with_video().await;
        let batch = vec![annotated(21, Some(20), 0.6, &[]), annotated(20, None, 0.6, &[])];
        let report = repo.persist_batch(42, &batch).await.unwrap();

        assert_eq!(report.comments_written, 2);
        assert_eq!(report.detached_parents, 0);
        assert_eq!(repo.find_comment(21).await.unwrap().unwrap().parent_id, Some(20));
    }

    #[tokio::test]
    async fn test_reply_links_to_previously_stored_parent() {
        let repo = repo_with_video().await;
        repo.persist_batch(42, &[annotated(30, None, 0.6, &[])]).await.unwrap();

        let report = repo
            .persist_batch(42, &[annotated(31, Some(30), 0.4, &[])])
            .await
            .unwrap();
        assert_eq!(report.detached_parents, 0);
        assert_eq!(repo.find_comment(31).await.unwrap().unwrap().parent_id, Some(30));
    }

    #[tokio::test]
    async fn test_orphan_reply_is_stored_unlinked() {
        let repo = repo_with_video().await;
        let report = repo
            .persist_batch(42, &[annotated(41, Some(40), 0.4, &[])])
            .await
            .unwrap();

        assert_eq!(report.comments_written, 1);
        assert_eq!(report.detached_parents, 1);
        assert_eq!(repo.find_comment(41).await.unwrap().unwrap().parent_id, None);
    }

    #[tokio::test]
    async fn test_parent_from_another_video_is_not_linked() {
        let repo = repo_with_video().await;
        repo.upsert_video(&video(43)).await.unwrap();
        repo.persist_batch(43, &[annotated(90, None, 0.6, &[])]).await.unwrap();

        let report = repo
            .persist_batch(42, &[annotated(91, Some(90), 0.4, &[])])
            .await
            .unwrap();

        assert_eq!(report.detached_parents, 1);
        assert_eq!(repo.find_comment(91).await.unwrap().unwrap().parent_id, None);
    }

    #[tokio::test]
    async fn test_failed_comment_write_leaves_no_rows() {
        let repo = repo_with_video().await;

        // Second insert chunk carries a row outside the relevance CHECK range
        let mut batch: Vec<AnnotatedComment> = (0..(COMMENT_CHUNK_SIZE as i64 + 100))
            .map(|i| annotated(1_000 + i, None, 0.6, &["批量"]))
            .collect();
        batch[COMMENT_CHUNK_SIZE + 50].annotation.relevance = 2.0;

        tokio_test::assert_err!(repo.persist_batch(42, &batch).await);

        let counts = repo.counts().await.unwrap();
        assert_eq!(counts.comment_count, 0);
        assert_eq!(counts.tag_count, 0);
        assert_eq!(repo.aggregate_sentiment(42).await.unwrap(), 0.5);

        // The store is still usable afterwards
        let report = repo.persist_batch(42, &batch[..10]).await.unwrap();
        assert_eq!(report.comments_written, 10);
        assert_eq!(repo.counts().await.unwrap().comment_count, 10);
    }

    #[tokio::test]
    async fn test_tag_failure_is_isolated() {
        let repo = repo_with_video().await;
        repo.conn()
            .execute_unprepared(
                "CREATE TRIGGER reject_tag BEFORE INSERT ON tags_dict \
                 WHEN NEW.tag_name = '坏标签' \
                 BEGIN SELECT RAISE(ABORT, 'tag rejected'); END",
            )
            .await
            .unwrap();

        let batch = vec![
            annotated(60, None, 0.8, &["坏标签", "配乐", "剪辑"]),
            annotated(61, None, 0.3, &["配乐"]),
        ];
        let report = repo.persist_batch(42, &batch).await.unwrap();

        assert_eq!(report.comments_written, 2);
        assert_eq!(report.tags.linked, 3);
        assert_eq!(report.tags.failures.len(), 1);
        assert_eq!(report.tags.failures[0].rpid, 60);
        assert_eq!(report.tags.failures[0].tag, "坏标签");

        assert_eq!(repo.counts().await.unwrap().comment_count, 2);
        assert_eq!(repo.tags_for_comment(60).await.unwrap(), vec!["剪辑", "配乐"]);
        assert_eq!(repo.tags_for_comment(61).await.unwrap(), vec!["配乐"]);
    }

    #[tokio::test]
    async fn test_tags_are_normalized_and_linked_once() {
        let repo = repo_with_video().await;
        let batch = vec![
            annotated(50, None, 0.8, &["配乐", "剪辑"]),
            annotated(51, None, 0.8, &["配乐"]),
        ];
        let report = repo.persist_batch(42, &batch).await.unwrap();
        assert_eq!(report.tags.linked, 3);
        assert!(report.tags.failures.is_empty());

        // Linking again is a no-op
        repo.persist_batch(42, &batch).await.unwrap();

        assert_eq!(repo.counts().await.unwrap().tag_count, 2);
        assert_eq!(repo.tags_for_comment(50).await.unwrap(), vec!["剪辑", "配乐"]);
        assert_eq!(repo.tags_for_comment(51).await.unwrap(), vec!["配乐"]);
    }

    #[tokio::test]
    async fn test_aggregate_defaults_to_neutral() {
        let repo = repo_with_video().await;
        assert_eq!(repo.aggregate_sentiment(42).await.unwrap(), 0.5);
        assert_eq!(repo.aggregate_sentiment(999).await.unwrap(), 0.5);
    }

    #[tokio::test]
    async fn test_aggregate_follows_storage_trigger() {
        let repo = repo_with_video().await;
        repo.persist_batch(42, &[annotated(70, None, 0.9, &[]), annotated(71, None, 0.7, &[])])
            .await
            .unwrap();

        let score = repo.aggregate_sentiment(42).await.unwrap();
        assert!((score - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_analysis_report_and_clear_all() {
        let repo = repo_with_video().await;
        repo.persist_batch(
            42,
            &[annotated(80, None, 0.9, &["好评", "画质"]), annotated(81, Some(80), 0.1, &[])],
        )
        .await
        .unwrap();

        let report = repo.analysis_report(42).await.unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].kind, CommentKind::Main);
        assert_eq!(report[0].label, SentimentLabel::Positive);
        assert_eq!(report[0].tags_display, "好评,画质");
        assert_eq!(report[1].kind, CommentKind::Reply);
        assert_eq!(report[1].label, SentimentLabel::Negative);

        repo.clear_all().await.unwrap();
        assert_eq!(repo.counts().await.unwrap(), StorageCounts::default());
    }
}
