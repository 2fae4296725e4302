//! Metadata fetcher
//!
//! Resolves a public identifier to the internal numeric id and display
//! metadata. Validation runs first so a malformed identifier never reaches
//! the network. Failures are not retried; the caller aborts the run.

use crate::client::VideoSource;
use crate::errors::IngestionError;
use crate::identifier::require_valid;
use replylens_common::VideoRef;
use tracing::{info, instrument, warn};

#[instrument(skip(source, credential))]
pub async fn fetch(
    source: &dyn VideoSource,
    bvid: &str,
    credential: &str,
) -> Result<VideoRef, IngestionError> {
    require_valid(bvid)?;

    match source.fetch_video(bvid, credential).await {
        Ok(video) => {
            info!(aid = video.aid, title = %video.title, "Video resolved");
            Ok(video)
        }
        Err(e) => {
            warn!(error = %e, "Video metadata lookup failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ReplyItem;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VideoSource for CountingSource {
        async fn fetch_video(&self, bvid: &str, _credential: &str) -> Result<VideoRef, IngestionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(VideoRef {
                bvid: bvid.to_string(),
                aid: 99,
                title: "t".to_string(),
                description: String::new(),
                cover_url: None,
                owner_name: None,
                owner_face: None,
                view_count: 0,
                like_count: 0,
                danmaku_count: 0,
            })
        }

        async fn fetch_page(
            &self,
            _video: &VideoRef,
            _page: u32,
            _credential: &str,
        ) -> Result<Vec<ReplyItem>, IngestionError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_invalid_identifier_skips_network() {
        let source = CountingSource::default();
        let err = fetch(&source, "bv1xx411c7mD", "cookie").await.unwrap_err();

        assert!(matches!(err, IngestionError::InvalidIdentifier(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_valid_identifier_resolves() {
        let source = CountingSource::default();
        let video = fetch(&source, "BV1xx411c7mD", "cookie").await.unwrap();

        assert_eq!(video.aid, 99);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
