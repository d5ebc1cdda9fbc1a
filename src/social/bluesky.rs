//! Bluesky (AT Protocol) client over plain XRPC calls.
//!
//! Handles the session lifecycle the bot needs: resume a persisted session,
//! refresh it when the access token expires, or log in fresh. Everything else
//! is a thin mapping of XRPC endpoints onto [`SocialClient`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{
    MentionRecord, NewPost, ParentPost, PostRecord, PostReference, SocialClient, SocialError,
    ThreadView,
};

pub const DEFAULT_SERVICE: &str = "https://bsky.social";
const POST_COLLECTION: &str = "app.bsky.feed.post";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub did: String,
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

pub struct BlueskyClient {
    http: reqwest::Client,
    service: String,
    identifier: String,
    password: String,
    session_path: PathBuf,
    session: RwLock<Option<Session>>,
}

impl BlueskyClient {
    pub fn new(
        service: &str,
        identifier: &str,
        password: &str,
        session_path: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("factcheck-bot/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .context("building bluesky http client")?;
        Ok(Self {
            http,
            service: service.trim_end_matches('/').to_string(),
            identifier: identifier.to_string(),
            password: password.to_string(),
            session_path: session_path.into(),
            session: RwLock::new(None),
        })
    }

    /// Resume the in-memory or persisted session if it still works, refresh it
    /// if it doesn't, and fall back to a fresh login.
    pub async fn ensure_auth(&self) -> Result<()> {
        let current = match self.session.read().await.clone() {
            Some(s) => Some(s),
            None => load_session(&self.session_path).await,
        };

        if let Some(session) = current {
            *self.session.write().await = Some(session.clone());
            match self.get_profile(&session).await {
                Ok(()) => {
                    tracing::debug!(target: "social", handle = %session.handle, "session resumed");
                    return Ok(());
                }
                Err(e) => {
                    tracing::info!(target: "social", error = %e, "session expired, refreshing");
                }
            }
            match self.refresh_session().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::info!(target: "social", error = %e, "refresh failed, logging in");
                }
            }
        }

        self.login().await
    }

    pub async fn login(&self) -> Result<()> {
        #[derive(Serialize)]
        struct CreateSession<'a> {
            identifier: &'a str,
            password: &'a str,
        }

        let resp = self
            .http
            .post(self.xrpc("com.atproto.server.createSession"))
            .json(&CreateSession {
                identifier: &self.identifier,
                password: &self.password,
            })
            .send()
            .await
            .context("createSession request")?;
        let session: Session = decode(check(resp).await?).await.context("createSession")?;

        tracing::info!(target: "social", handle = %session.handle, "logged in");
        self.install_session(session).await;
        Ok(())
    }

    async fn refresh_session(&self) -> Result<(), SocialError> {
        let refresh_jwt = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.refresh_jwt.clone())
            .ok_or(SocialError::NoSession)?;

        let resp = self
            .http
            .post(self.xrpc("com.atproto.server.refreshSession"))
            .bearer_auth(refresh_jwt)
            .send()
            .await?;
        let session: Session = decode(check(resp).await?).await?;
        tracing::debug!(target: "social", handle = %session.handle, "session refreshed");
        self.install_session(session).await;
        Ok(())
    }

    async fn get_profile(&self, session: &Session) -> Result<(), SocialError> {
        let resp = self
            .http
            .get(self.xrpc("app.bsky.actor.getProfile"))
            .query(&[("actor", session.handle.as_str())])
            .bearer_auth(&session.access_jwt)
            .send()
            .await?;
        check(resp).await.map(|_| ())
    }

    async fn install_session(&self, session: Session) {
        if let Err(e) = save_session(&self.session_path, &session).await {
            tracing::warn!(target: "social", error = %e, "failed to persist session");
        }
        *self.session.write().await = Some(session);
    }

    async fn current_session(&self) -> Result<Session, SocialError> {
        self.session.read().await.clone().ok_or(SocialError::NoSession)
    }

    fn xrpc(&self, nsid: &str) -> String {
        format!("{}/xrpc/{}", self.service, nsid)
    }

    /// Send with the access token; an expired token is refreshed once and the
    /// request replayed.
    async fn send_authed<F>(&self, build: F) -> Result<Response, SocialError>
    where
        F: Fn(&str) -> RequestBuilder + Send + Sync,
    {
        let session = self.current_session().await?;
        match check(build(&session.access_jwt).send().await?).await {
            Err(SocialError::Unauthorized) => {
                self.refresh_session().await?;
                let session = self.current_session().await?;
                check(build(&session.access_jwt).send().await?).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl SocialClient for BlueskyClient {
    async fn ensure_session(&self) -> Result<()> {
        self.ensure_auth().await
    }

    async fn list_mentions(&self, limit: u32) -> Result<Vec<MentionRecord>, SocialError> {
        #[derive(Deserialize)]
        struct ListNotifications {
            #[serde(default)]
            notifications: Vec<MentionRecord>,
        }

        let url = self.xrpc("app.bsky.notification.listNotifications");
        let limit = limit.to_string();
        let resp = self
            .send_authed(|token| {
                self.http
                    .get(&url)
                    .query(&[("limit", limit.as_str())])
                    .bearer_auth(token)
            })
            .await?;
        let body: ListNotifications = decode(resp).await?;
        Ok(body.notifications)
    }

    async fn get_thread(&self, uri: &str) -> Result<ThreadView, SocialError> {
        #[derive(Deserialize)]
        struct GetPostThread {
            thread: RawThread,
        }
        #[derive(Deserialize)]
        struct RawThread {
            #[serde(default)]
            parent: Option<RawParent>,
        }
        #[derive(Deserialize)]
        struct RawParent {
            // absent for notFoundPost / blockedPost
            #[serde(default)]
            post: Option<RawPost>,
        }
        #[derive(Deserialize)]
        struct RawPost {
            uri: String,
            cid: String,
            #[serde(default)]
            record: PostRecord,
        }

        let url = self.xrpc("app.bsky.feed.getPostThread");
        let resp = self
            .send_authed(|token| {
                self.http
                    .get(&url)
                    .query(&[("uri", uri), ("depth", "0"), ("parentHeight", "1")])
                    .bearer_auth(token)
            })
            .await?;
        let body: GetPostThread = decode(resp).await?;

        let parent = body
            .thread
            .parent
            .and_then(|p| p.post)
            .filter(|p| !p.record.text.trim().is_empty())
            .map(|p| ParentPost {
                reference: PostReference::new(p.uri, p.cid),
                text: p.record.text,
            });
        Ok(ThreadView { parent })
    }

    async fn post(&self, post: &NewPost) -> Result<PostReference, SocialError> {
        #[derive(Serialize)]
        struct CreateRecord<'a> {
            repo: &'a str,
            collection: &'a str,
            record: serde_json::Value,
        }

        let session = self.current_session().await?;
        let mut record = serde_json::to_value(post).map_err(|e| SocialError::Decode(e.to_string()))?;
        if let Some(obj) = record.as_object_mut() {
            obj.insert("$type".into(), POST_COLLECTION.into());
            obj.insert("createdAt".into(), rfc3339(Utc::now()).into());
        }
        let body = CreateRecord {
            repo: &session.did,
            collection: POST_COLLECTION,
            record,
        };

        let url = self.xrpc("com.atproto.repo.createRecord");
        let resp = self
            .send_authed(|token| self.http.post(&url).json(&body).bearer_auth(token))
            .await?;
        decode(resp).await
    }

    async fn mark_seen(&self, seen_at: DateTime<Utc>) -> Result<(), SocialError> {
        let url = self.xrpc("app.bsky.notification.updateSeen");
        let body = serde_json::json!({ "seenAt": rfc3339(seen_at) });
        self.send_authed(|token| self.http.post(&url).json(&body).bearer_auth(token))
            .await
            .map(|_| ())
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Map status codes onto [`SocialError`]; success passes the response through.
async fn check(resp: Response) -> Result<Response, SocialError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(SocialError::RateLimited {
            retry_after: retry_after(&resp),
        });
    }
    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || body.contains("ExpiredToken") {
        return Err(SocialError::Unauthorized);
    }
    Err(SocialError::Http {
        status: status.as_u16(),
        body,
    })
}

/// `retry-after` seconds, else the `ratelimit-reset` epoch relative to now.
fn retry_after(resp: &Response) -> Option<Duration> {
    let header = |name: &str| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };
    if let Some(secs) = header("retry-after") {
        return u64::try_from(secs).ok().map(Duration::from_secs);
    }
    header("ratelimit-reset")
        .map(|reset| reset - Utc::now().timestamp())
        .and_then(|secs| u64::try_from(secs).ok())
        .map(Duration::from_secs)
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, SocialError> {
    resp.json::<T>()
        .await
        .map_err(|e| SocialError::Decode(e.to_string()))
}

async fn load_session(path: &Path) -> Option<Session> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&raw) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(target: "social", path = %path.display(), error = %e, "ignoring unreadable session file");
            None
        }
    }
}

async fn save_session(path: &Path, session: &Session) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    let json = serde_json::to_string(session)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    // Tokens are bearer credentials: owner read/write only.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            .await
            .with_context(|| format!("restricting {}", tmp.display()))?;
    }
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("replacing {}", path.display()))
}
