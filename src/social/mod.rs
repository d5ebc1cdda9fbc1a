//! Social network seam. The dispatcher only talks to [`SocialClient`];
//! [`bluesky::BlueskyClient`] is the production implementation.

pub mod bluesky;
pub mod facets;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use bluesky::BlueskyClient;
pub use facets::{detect_link_facets, Facet};

/// Identifies a posted message; the anchor for replies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostReference {
    pub uri: String,
    pub cid: String,
}

impl PostReference {
    pub fn new(uri: impl Into<String>, cid: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            cid: cid.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub root: PostReference,
    pub parent: PostReference,
}

/// The post record attached to a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
}

/// One entry of the notification listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MentionRecord {
    pub uri: String,
    pub cid: String,
    pub reason: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub indexed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub record: PostRecord,
}

impl MentionRecord {
    pub fn is_mention(&self) -> bool {
        self.reason == "mention"
    }

    pub fn reference(&self) -> PostReference {
        PostReference::new(&self.uri, &self.cid)
    }
}

/// The post a mention replied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentPost {
    pub reference: PostReference,
    pub text: String,
}

/// Thread context for a post; `parent` is absent when it was deleted, blocked,
/// or the post is a thread root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadView {
    pub parent: Option<ParentPost>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facets: Vec<Facet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
}

impl NewPost {
    /// Reply to `parent` inside the thread rooted at `root`, with link facets attached.
    pub fn reply(text: impl Into<String>, root: &PostReference, parent: &PostReference) -> Self {
        let text = text.into();
        Self {
            facets: detect_link_facets(&text),
            text,
            reply: Some(ReplyRef {
                root: root.clone(),
                parent: parent.clone(),
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SocialError {
    #[error("rate limited by the social network")]
    RateLimited { retry_after: Option<Duration> },
    #[error("not authorized")]
    Unauthorized,
    #[error("no active session")]
    NoSession,
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
}

#[async_trait::async_trait]
pub trait SocialClient: Send + Sync {
    /// Make sure an authenticated session exists before a cycle starts.
    async fn ensure_session(&self) -> anyhow::Result<()> {
        Ok(())
    }
    /// Most recent notifications, newest first, at most `limit`.
    async fn list_mentions(&self, limit: u32) -> Result<Vec<MentionRecord>, SocialError>;
    async fn get_thread(&self, uri: &str) -> Result<ThreadView, SocialError>;
    async fn post(&self, post: &NewPost) -> Result<PostReference, SocialError>;
    async fn mark_seen(&self, seen_at: DateTime<Utc>) -> Result<(), SocialError>;
}
