// src/quota/store.rs
use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::QuotaState;

/// Persistence seam for the quota record.
#[async_trait::async_trait]
pub trait QuotaStore: Send + Sync {
    /// `None` means no record exists yet.
    async fn load(&self) -> Result<Option<QuotaState>>;
    async fn save(&self, state: &QuotaState) -> Result<()>;
}

/// Pretty-printed JSON file, replaced atomically via a `.tmp` sibling.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl QuotaStore for JsonFileStore {
    async fn load(&self) -> Result<Option<QuotaState>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };
        match serde_json::from_str::<QuotaState>(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                tracing::warn!(
                    target: "quota",
                    path = %self.path.display(),
                    error = %e,
                    "unreadable quota record, starting fresh"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, state: &QuotaState) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(state).context("encoding quota record")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

/// Shared in-memory record; clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Option<QuotaState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: QuotaState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(state))),
        }
    }

    pub fn get(&self) -> Option<QuotaState> {
        *self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait::async_trait]
impl QuotaStore for MemoryStore {
    async fn load(&self) -> Result<Option<QuotaState>> {
        Ok(self.get())
    }

    async fn save(&self, state: &QuotaState) -> Result<()> {
        *self.inner.lock().unwrap_or_else(|p| p.into_inner()) = Some(*state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn file_store_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("ratelimit.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_persists_and_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/ratelimit.json");
        let store = JsonFileStore::new(&path);

        let mut st = QuotaState::fresh(Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap());
        st.hourly_points = 9;
        st.daily_points = 27;
        store.save(&st).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(store.load().await.unwrap(), Some(st));
    }

    #[tokio::test]
    async fn file_store_treats_garbage_as_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratelimit.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(store.load().await.unwrap().is_none());
    }
}
