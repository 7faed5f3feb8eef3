//! Cache-aside store for provider model lists.
//!
//! A cached entry is always served without touching the network. Entries
//! older than `max_age` are refreshed by a detached task; only a cold start
//! (no readable entry) makes the caller wait for a fetch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Something that can fetch a provider's live model list.
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    async fn fetch_models(&self) -> Result<serde_json::Value>;
}

/// Persisted cache record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: serde_json::Value,
    /// Fetch time in epoch milliseconds.
    pub timestamp: i64,
}

impl CacheEntry {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn age(&self, now_millis: i64) -> Duration {
        Duration::from_millis(now_millis.saturating_sub(self.timestamp).max(0) as u64)
    }
}

/// Persisted cache read/write failures. Always recovered locally.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file '{path}' is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Copy)]
enum Refresh {
    Background,
    Inline,
}

/// Clears the in-flight flag when the refresh task ends, even by panic.
struct RefreshGuard(Arc<Inner>);

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.0.refreshing.store(false, Ordering::Release);
    }
}

struct Inner {
    path: PathBuf,
    max_age: Duration,
    fetcher: Arc<dyn ModelFetcher>,
    refreshing: AtomicBool,
}

/// Model list cache for one provider.
#[derive(Clone)]
pub struct ModelCache {
    inner: Arc<Inner>,
}

impl ModelCache {
    pub fn new(path: impl Into<PathBuf>, max_age: Duration, fetcher: Arc<dyn ModelFetcher>) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                max_age,
                fetcher,
                refreshing: AtomicBool::new(false),
            }),
        }
    }

    /// Conventional cache file location for a provider.
    pub fn path_for(dir: &Path, provider: &str) -> PathBuf {
        dir.join(format!("{}_models.json", provider))
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Return the model list, from cache whenever an entry exists.
    pub async fn list_models(&self) -> Result<serde_json::Value> {
        self.list_with(Refresh::Background).await
    }

    /// Like [`list_models`](Self::list_models), but a stale entry is
    /// refreshed before returning. For one-shot callers whose runtime ends
    /// before a detached refresh could finish.
    ///
    /// If that refresh fails, the stale data is returned.
    pub async fn list_models_inline(&self) -> Result<serde_json::Value> {
        self.list_with(Refresh::Inline).await
    }

    async fn list_with(&self, refresh: Refresh) -> Result<serde_json::Value> {
        match self.read_entry().await {
            Ok(Some(entry)) => {
                let age = entry.age(chrono::Utc::now().timestamp_millis());
                if age <= self.inner.max_age {
                    tracing::debug!(path = %self.inner.path.display(), "Model cache hit");
                    return Ok(entry.data);
                }
                tracing::info!(
                    path = %self.inner.path.display(),
                    age_secs = age.as_secs(),
                    "Model cache is stale, refreshing"
                );
                match refresh {
                    Refresh::Background => {
                        self.spawn_refresh();
                        return Ok(entry.data);
                    }
                    Refresh::Inline => {
                        return match self.fetch_and_store().await {
                            Ok(data) => Ok(data),
                            Err(e) => {
                                tracing::warn!(error = %e, "Model cache refresh failed, serving stale entry");
                                Ok(entry.data)
                            }
                        };
                    }
                }
            }
            Ok(None) => {
                tracing::debug!(path = %self.inner.path.display(), "Model cache miss");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read model cache, fetching live");
            }
        }

        self.fetch_and_store().await
    }

    /// Fetch from upstream and persist, returning the fresh data.
    ///
    /// A persist failure is logged; the fetched data is still returned.
    pub async fn fetch_and_store(&self) -> Result<serde_json::Value> {
        let data = self.inner.fetcher.fetch_models().await?;
        let entry = CacheEntry::new(data);
        if let Err(e) = self.write_entry(&entry).await {
            tracing::warn!(error = %e, "Failed to persist model cache");
        }
        Ok(entry.data)
    }

    /// Spawn a fire-and-forget refresh unless one is already in flight.
    fn spawn_refresh(&self) {
        if self.inner.refreshing.swap(true, Ordering::AcqRel) {
            tracing::debug!("Model cache refresh already in flight");
            return;
        }
        let cache = self.clone();
        tokio::spawn(async move {
            let _guard = RefreshGuard(cache.inner.clone());
            if let Err(e) = cache.fetch_and_store().await {
                tracing::warn!(
                    path = %cache.inner.path.display(),
                    error = %e,
                    "Background model cache refresh failed"
                );
            }
        });
    }

    /// Read the persisted entry. `Ok(None)` means no file exists yet.
    pub async fn read_entry(&self) -> std::result::Result<Option<CacheEntry>, CacheError> {
        let path = &self.inner.path;
        let content = match tokio::fs::read(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CacheError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|source| CacheError::Corrupt {
                path: path.display().to_string(),
                source,
            })
    }

    /// Replace the persisted entry wholesale: write a temp file, then rename.
    pub async fn write_entry(&self, entry: &CacheEntry) -> std::result::Result<(), CacheError> {
        let path = &self.inner.path;
        let io_err = |source: std::io::Error| CacheError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
        }

        let body = serde_json::to_vec(entry).map_err(|source| CacheError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, body).await.map_err(io_err)?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Fetcher that counts calls and can be held open until released.
    struct CountingFetcher {
        calls: AtomicUsize,
        fail: bool,
        panic_first: bool,
        gate: Option<Arc<Notify>>,
        done: Arc<Notify>,
    }

    impl CountingFetcher {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
                panic_first: false,
                gate: None,
                done: Arc::new(Notify::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelFetcher for CountingFetcher {
        async fn fetch_models(&self) -> Result<serde_json::Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.panic_first && n == 1 {
                panic!("fetcher blew up");
            }
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let result = if self.fail {
                Err(Error::Internal("fetch failed".to_string()))
            } else {
                Ok(serde_json::json!({"data": [{"id": format!("model-{}", n)}]}))
            };
            self.done.notify_one();
            result
        }
    }

    fn cache_with(dir: &Path, fetcher: Arc<CountingFetcher>) -> ModelCache {
        ModelCache::new(
            ModelCache::path_for(dir, "test"),
            Duration::from_secs(24 * 60 * 60),
            fetcher,
        )
    }

    fn write_raw(path: &Path, entry: &CacheEntry) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_vec(entry).unwrap()).unwrap();
    }

    fn two_days_ago() -> i64 {
        chrono::Utc::now().timestamp_millis() - 2 * 24 * 60 * 60 * 1000
    }

    #[tokio::test]
    async fn test_cold_start_fetches_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new());
        let cache = cache_with(&dir.path().join("nested"), fetcher.clone());

        let models = cache.list_models().await.unwrap();
        assert_eq!(models["data"][0]["id"], "model-1");
        assert_eq!(fetcher.calls(), 1);

        let entry = cache.read_entry().await.unwrap().expect("entry persisted");
        assert_eq!(entry.data, models);
        assert!(entry.age(chrono::Utc::now().timestamp_millis()) < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_fresh_entry_served_without_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new());
        let cache = cache_with(dir.path(), fetcher.clone());

        let first = cache.list_models().await.unwrap();
        let second = cache.list_models().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fetcher.calls(), 1, "second call must not fetch");
    }

    #[tokio::test]
    async fn test_stale_entry_returned_immediately_and_refreshed_once() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(CountingFetcher {
            gate: Some(gate.clone()),
            ..CountingFetcher::new()
        });
        let cache = cache_with(dir.path(), fetcher.clone());

        let stale = CacheEntry {
            data: serde_json::json!({"data": [{"id": "stale"}]}),
            timestamp: two_days_ago(),
        };
        write_raw(cache.path(), &stale);

        // The fetch is blocked on the gate, so these return only because
        // they do not wait for it.
        let first = tokio::time::timeout(Duration::from_secs(1), cache.list_models())
            .await
            .expect("stale read must not block")
            .unwrap();
        let again = tokio::time::timeout(Duration::from_secs(1), cache.list_models())
            .await
            .expect("stale read must not block")
            .unwrap();
        assert_eq!(first, stale.data);
        assert_eq!(again, stale.data);

        tokio::task::yield_now().await;
        let done = fetcher.done.clone();
        gate.notify_one();
        tokio::time::timeout(Duration::from_secs(1), done.notified())
            .await
            .expect("background fetch completes");
        assert_eq!(fetcher.calls(), 1);

        // Wait for the rename to land.
        let mut refreshed = None;
        for _ in 0..50 {
            let entry = cache.read_entry().await.unwrap().unwrap();
            if entry.data != stale.data {
                refreshed = Some(entry);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let refreshed = refreshed.expect("cache rewritten by refresh");
        assert_eq!(refreshed.data["data"][0]["id"], "model-1");
        assert!(refreshed.timestamp > stale.timestamp);
    }

    #[tokio::test]
    async fn test_background_refresh_failure_keeps_stale_entry() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher {
            fail: true,
            ..CountingFetcher::new()
        });
        let cache = cache_with(dir.path(), fetcher.clone());
        let stale = CacheEntry {
            data: serde_json::json!(["old"]),
            timestamp: two_days_ago(),
        };
        write_raw(cache.path(), &stale);

        let done = fetcher.done.clone();
        assert_eq!(cache.list_models().await.unwrap(), stale.data);
        tokio::time::timeout(Duration::from_secs(1), done.notified())
            .await
            .expect("background fetch attempted");

        assert_eq!(cache.read_entry().await.unwrap().unwrap(), stale);
    }

    #[tokio::test]
    async fn test_refresh_flag_cleared_after_panicking_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher {
            panic_first: true,
            ..CountingFetcher::new()
        });
        let cache = cache_with(dir.path(), fetcher.clone());
        let stale = CacheEntry {
            data: serde_json::json!(["old"]),
            timestamp: two_days_ago(),
        };
        write_raw(cache.path(), &stale);

        assert_eq!(cache.list_models().await.unwrap(), stale.data);
        for _ in 0..100 {
            if fetcher.calls() == 1 && !cache.inner.refreshing.load(Ordering::Acquire) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!cache.inner.refreshing.load(Ordering::Acquire));

        let done = fetcher.done.clone();
        assert_eq!(cache.list_models().await.unwrap(), stale.data);
        tokio::time::timeout(Duration::from_secs(1), done.notified())
            .await
            .expect("second refresh runs");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_inline_refresh_replaces_stale_entry_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new());
        let cache = cache_with(dir.path(), fetcher.clone());
        let stale = CacheEntry {
            data: serde_json::json!(["old"]),
            timestamp: two_days_ago(),
        };
        write_raw(cache.path(), &stale);

        let models = cache.list_models_inline().await.unwrap();
        assert_eq!(models["data"][0]["id"], "model-1");
        assert_eq!(cache.read_entry().await.unwrap().unwrap().data, models);
        assert_eq!(fetcher.calls(), 1);

        // Fresh now; no further fetch.
        assert_eq!(cache.list_models_inline().await.unwrap(), models);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_inline_refresh_failure_serves_stale_entry() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher {
            fail: true,
            ..CountingFetcher::new()
        });
        let cache = cache_with(dir.path(), fetcher);
        let stale = CacheEntry {
            data: serde_json::json!(["old"]),
            timestamp: two_days_ago(),
        };
        write_raw(cache.path(), &stale);

        assert_eq!(cache.list_models_inline().await.unwrap(), stale.data);
    }

    #[tokio::test]
    async fn test_cold_start_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher {
            fail: true,
            ..CountingFetcher::new()
        });
        let cache = cache_with(dir.path(), fetcher);

        assert!(cache.list_models().await.is_err());
        assert!(cache.read_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_falls_through_to_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new());
        let cache = cache_with(dir.path(), fetcher.clone());
        std::fs::write(cache.path(), b"{not json").unwrap();

        assert!(matches!(
            cache.read_entry().await,
            Err(CacheError::Corrupt { .. })
        ));
        let models = cache.list_models().await.unwrap();
        assert_eq!(models["data"][0]["id"], "model-1");
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.read_entry().await.unwrap().unwrap().data, models);
    }

    #[test]
    fn test_entry_wire_format() {
        let entry = CacheEntry {
            data: serde_json::json!({"data": []}),
            timestamp: 1_700_000_000_000,
        };
        assert_eq!(
            serde_json::to_string(&entry).unwrap(),
            r#"{"data":{"data":[]},"timestamp":1700000000000}"#
        );
    }

    #[test]
    fn test_path_for_provider() {
        assert_eq!(
            ModelCache::path_for(Path::new("cache"), "openrouter"),
            PathBuf::from("cache/openrouter_models.json")
        );
    }
}
