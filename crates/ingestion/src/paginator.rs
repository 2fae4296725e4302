//! Comment paginator
//!
//! Walks comment pages strictly one at a time with a pause between requests.
//! The first failed or empty page ends the walk; everything gathered so far
//! is kept. Nested replies are flattened onto their top-level comment.

use crate::cleaner::clean_or_discard;
use crate::client::{ReplyItem, VideoSource};
use crate::errors::IngestionError;
use crate::metadata;
use replylens_common::config::UpstreamConfig;
use replylens_common::{Comment, VideoRef};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Why pagination ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStop {
    /// `max_pages` pages were fetched
    PageLimit,
    /// A page came back with no replies
    Exhausted { page: u32 },
    /// A page request failed
    Failed { page: u32, error: String },
}

/// Result of one pagination pass
#[derive(Debug, Clone)]
pub struct PaginationOutcome {
    /// Flat list in discovery order
    pub comments: Vec<Comment>,
    pub pages_fetched: u32,
    pub discarded: usize,
    pub stop: PageStop,
}

/// Sequential comment page walker
pub struct CommentPaginator {
    source: Arc<dyn VideoSource>,
    page_delay: Duration,
}

impl CommentPaginator {
    pub fn new(source: Arc<dyn VideoSource>, page_delay: Duration) -> Self {
        Self { source, page_delay }
    }

    pub fn from_config(source: Arc<dyn VideoSource>, config: &UpstreamConfig) -> Self {
        Self::new(source, config.page_delay())
    }

    /// Resolve the identifier, then paginate
    pub async fn paginate_by_id(
        &self,
        bvid: &str,
        credential: &str,
        max_pages: u32,
    ) -> Result<PaginationOutcome, IngestionError> {
        let video = metadata::fetch(self.source.as_ref(), bvid, credential).await?;
        Ok(self.paginate(&video, credential, max_pages).await)
    }

    /// Collect up to `max_pages` pages of comments for an already resolved video
    #[instrument(skip(self, video, credential), fields(bvid = %video.bvid, aid = video.aid))]
    pub async fn paginate(&self, video: &VideoRef, credential: &str, max_pages: u32) -> PaginationOutcome {
        let mut comments = Vec::new();
        let mut seen = HashSet::new();
        let mut discarded = 0;
        let mut pages_fetched = 0;
        let mut stop = PageStop::PageLimit;

        for page in 1..=max_pages {
            if page > 1 && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }

            let items = match self.source.fetch_page(video, page, credential).await {
                Ok(items) => items,
                Err(e) => {
                    warn!(page, error = %e, "Comment page fetch failed, keeping collected comments");
                    stop = PageStop::Failed {
                        page,
                        error: e.to_string(),
                    };
                    break;
                }
            };

            if items.is_empty() {
                debug!(page, "No more comments");
                stop = PageStop::Exhausted { page };
                break;
            }

            pages_fetched += 1;
            let before = comments.len();
            let page_discarded = flatten_page(video.aid, &items, &mut seen, &mut comments);
            discarded += page_discarded;

            replylens_common::metrics::record_page(comments.len() - before, page_discarded);
            debug!(page, kept = comments.len() - before, discarded = page_discarded, "Page collected");
        }

        info!(
            comments = comments.len(),
            pages = pages_fetched,
            discarded,
            stop = ?stop,
            "Pagination finished"
        );

        PaginationOutcome {
            comments,
            pages_fetched,
            discarded,
            stop,
        }
    }
}

/// Append one page's comments; returns how many were dropped as noise.
///
/// A nested reply is kept on its own merits even when its top-level comment
/// is noise. Repeated `rpid`s keep their first occurrence.
fn flatten_page(
    aid: i64,
    items: &[ReplyItem],
    seen: &mut HashSet<i64>,
    out: &mut Vec<Comment>,
) -> usize {
    let mut discarded = 0;

    for item in items {
        let Some(rpid) = item.rpid else { continue };

        if !push_comment(aid, rpid, None, item, seen, out) {
            discarded += 1;
        }

        for nested in item.nested() {
            let Some(nested_rpid) = nested.rpid else { continue };
            if !push_comment(aid, nested_rpid, Some(rpid), nested, seen, out) {
                discarded += 1;
            }
        }
    }

    discarded
}

fn push_comment(
    aid: i64,
    rpid: i64,
    parent_rpid: Option<i64>,
    item: &ReplyItem,
    seen: &mut HashSet<i64>,
    out: &mut Vec<Comment>,
) -> bool {
    let Some(content) = clean_or_discard(item.message()) else {
        return false;
    };

    if seen.insert(rpid) {
        out.push(Comment {
            rpid,
            aid,
            parent_rpid,
            author_name: item.author().to_string(),
            content,
        });
    }
    true
}
