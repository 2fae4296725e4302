//! Upstream video service client
//!
//! Responses are decoded through explicit per-endpoint schemas. Every field is
//! optional: a missing or mistyped field reads as absent instead of failing the
//! whole payload, and the caller decides what absence means.

use crate::errors::IngestionError;
use async_trait::async_trait;
use replylens_common::config::UpstreamConfig;
use replylens_common::VideoRef;
use reqwest::header::{COOKIE, REFERER, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Author shown when the upstream omits one
pub const UNKNOWN_AUTHOR: &str = "未知用户";

/// Source of video metadata and comment pages
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Resolve a public identifier to full metadata
    async fn fetch_video(&self, bvid: &str, credential: &str) -> Result<VideoRef, IngestionError>;

    /// Fetch one page of top-level replies. An empty list means no more pages.
    async fn fetch_page(
        &self,
        video: &VideoRef,
        page: u32,
        credential: &str,
    ) -> Result<Vec<ReplyItem>, IngestionError>;
}

// ============================================================================
// Response schemas
// ============================================================================

/// Common envelope of every endpoint
#[derive(Debug)]
struct Envelope {
    code: i64,
    data: Option<Value>,
}

impl Envelope {
    fn from_value(value: Value) -> Self {
        Self {
            code: value.get("code").and_then(Value::as_i64).unwrap_or(-1),
            data: value.get("data").filter(|d| !d.is_null()).cloned(),
        }
    }

    fn data<T: DeserializeOwned>(&self) -> Option<T> {
        self.data
            .as_ref()
            .and_then(|d| serde_json::from_value(d.clone()).ok())
    }
}

/// Read a field as absent when it is missing or has an unexpected shape
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Default, Deserialize)]
struct ViewData {
    #[serde(default, deserialize_with = "lenient")]
    aid: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pic: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    desc: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    owner: Option<OwnerData>,
    #[serde(default, deserialize_with = "lenient")]
    stat: Option<StatData>,
}

#[derive(Debug, Default, Deserialize)]
struct OwnerData {
    #[serde(default, deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    face: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StatData {
    #[serde(default, deserialize_with = "lenient")]
    view: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    like: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    danmaku: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ReplyPageData {
    #[serde(default, deserialize_with = "lenient")]
    replies: Option<Vec<Value>>,
}

/// One reply as listed by the comment endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplyItem {
    #[serde(default, deserialize_with = "lenient")]
    pub rpid: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub content: Option<ReplyContent>,
    #[serde(default, deserialize_with = "lenient")]
    pub member: Option<ReplyMember>,
    /// First-level nested replies; anything deeper is ignored
    #[serde(default, deserialize_with = "lenient")]
    pub replies: Option<Vec<ReplyItem>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplyContent {
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplyMember {
    #[serde(default, deserialize_with = "lenient")]
    pub uname: Option<String>,
}

impl ReplyItem {
    pub fn message(&self) -> &str {
        self.content
            .as_ref()
            .and_then(|c| c.message.as_deref())
            .unwrap_or("")
    }

    pub fn author(&self) -> &str {
        self.member
            .as_ref()
            .and_then(|m| m.uname.as_deref())
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_AUTHOR)
    }

    pub fn nested(&self) -> &[ReplyItem] {
        self.replies.as_deref().unwrap_or(&[])
    }
}

/// Decode a page's reply list one item at a time; items without an id are skipped
fn decode_replies(data: Option<ReplyPageData>) -> Vec<ReplyItem> {
    data.and_then(|d| d.replies)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| serde_json::from_value::<ReplyItem>(item).ok())
        .filter(|item| item.rpid.is_some())
        .collect()
}

// ============================================================================
// HTTP client
// ============================================================================

/// HTTP client for the public video API
pub struct BilibiliClient {
    client: reqwest::Client,
    api_base: String,
    referer_base: String,
    user_agent: String,
    metadata_timeout: Duration,
    page_timeout: Duration,
    sort_mode: u8,
}

impl BilibiliClient {
    /// Create a new client
    pub fn new(config: &UpstreamConfig) -> Result<Self, IngestionError> {
        let client = reqwest::Client::builder().build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            referer_base: config.referer_base.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            metadata_timeout: Duration::from_secs(config.metadata_timeout_secs),
            page_timeout: Duration::from_secs(config.page_timeout_secs),
            sort_mode: config.sort_mode,
        })
    }

    async fn get_envelope(
        &self,
        url: String,
        query: &[(&str, String)],
        referer: String,
        credential: &str,
        timeout: Duration,
    ) -> Result<Envelope, IngestionError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header(USER_AGENT, &self.user_agent)
            .header(COOKIE, credential)
            .header(REFERER, referer)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| IngestionError::Decode(e.to_string()))?;

        Ok(Envelope::from_value(body))
    }
}

#[async_trait]
impl VideoSource for BilibiliClient {
    async fn fetch_video(&self, bvid: &str, credential: &str) -> Result<VideoRef, IngestionError> {
        let envelope = self
            .get_envelope(
                format!("{}/x/web-interface/view", self.api_base),
                &[("bvid", bvid.to_string())],
                format!("{}/{}", self.referer_base, bvid),
                credential,
                self.metadata_timeout,
            )
            .await?;

        let not_found = || IngestionError::NotFound {
            bvid: bvid.to_string(),
            code: envelope.code,
        };

        if envelope.code != 0 {
            return Err(not_found());
        }

        let data: ViewData = envelope.data().ok_or_else(not_found)?;
        let aid = data.aid.ok_or_else(not_found)?;
        let owner = data.owner.unwrap_or_default();
        let stat = data.stat.unwrap_or_default();

        debug!(bvid = %bvid, aid, "Video metadata resolved");

        Ok(VideoRef {
            bvid: bvid.to_string(),
            aid,
            title: data.title.unwrap_or_default(),
            description: data.desc.unwrap_or_default(),
            cover_url: data.pic.filter(|s| !s.is_empty()),
            owner_name: owner.name.filter(|s| !s.is_empty()),
            owner_face: owner.face.filter(|s| !s.is_empty()),
            view_count: stat.view.unwrap_or(0),
            like_count: stat.like.unwrap_or(0),
            danmaku_count: stat.danmaku.unwrap_or(0),
        })
    }

    async fn fetch_page(
        &self,
        video: &VideoRef,
        page: u32,
        credential: &str,
    ) -> Result<Vec<ReplyItem>, IngestionError> {
        let envelope = self
            .get_envelope(
                format!("{}/x/v2/reply", self.api_base),
                &[
                    ("type", "1".to_string()),
                    ("oid", video.aid.to_string()),
                    ("pn", page.to_string()),
                    ("mode", self.sort_mode.to_string()),
                ],
                format!("{}/{}", self.referer_base, video.bvid),
                credential,
                self.page_timeout,
            )
            .await?;

        if envelope.code != 0 {
            return Err(IngestionError::PageRejected {
                page,
                code: envelope.code,
            });
        }

        Ok(decode_replies(envelope.data()))
    }
}
