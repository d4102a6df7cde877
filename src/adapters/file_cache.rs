//! Workspace file cache
//!
//! Serves file reads with bounded staleness and makes writes durable in
//! both the cache and the gateway. The gateway is the source of truth for
//! file content; the cache is never updated with content the gateway does
//! not have.
//!
//! Concurrent reads that all observe a miss or a stale entry coalesce into
//! a single gateway refresh: the per-filename lock admits one refresher,
//! and everyone queued behind it re-reads the store and finds the fresh
//! entry without issuing a second gateway call.

use crate::adapters::broadcast::Broadcaster;
use crate::adapters::gateway_client::GatewayClient;
use crate::adapters::keyed_lock::KeyedLocks;
use crate::domain::{CachedFile, ChangeNotification, CoreError};
use crate::persistence::FileStore;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct WorkspaceFileCache {
    store: Arc<dyn FileStore>,
    gateway: Arc<GatewayClient>,
    broadcaster: Arc<Broadcaster>,
    allowed: HashSet<String>,
    staleness: ChronoDuration,
    refills: KeyedLocks,
}

impl WorkspaceFileCache {
    pub fn new(
        store: Arc<dyn FileStore>,
        gateway: Arc<GatewayClient>,
        broadcaster: Arc<Broadcaster>,
        allowed_files: impl IntoIterator<Item = String>,
        staleness_secs: u64,
    ) -> Self {
        Self {
            store,
            gateway,
            broadcaster,
            allowed: allowed_files.into_iter().collect(),
            staleness: ChronoDuration::seconds(staleness_secs as i64),
            refills: KeyedLocks::new(),
        }
    }

    fn check_allowed(&self, filename: &str) -> Result<(), CoreError> {
        if self.allowed.contains(filename) {
            Ok(())
        } else {
            Err(CoreError::Forbidden {
                filename: filename.to_string(),
            })
        }
    }

    fn is_fresh(&self, entry: &CachedFile) -> bool {
        Utc::now() - entry.last_modified < self.staleness
    }

    /// Read a file through the cache.
    ///
    /// A fresh cached entry is returned without gateway I/O. A miss or a
    /// stale entry triggers a coalesced refresh; if the refresh fails and a
    /// stale entry exists, the stale entry is returned rather than failing
    /// the caller.
    pub async fn get_file(&self, filename: &str) -> Result<CachedFile, CoreError> {
        self.check_allowed(filename)?;

        if let Some(entry) = self.store.get_cached_file(filename).await? {
            if self.is_fresh(&entry) {
                return Ok(entry);
            }
        }

        let _guard = self.refills.acquire(filename).await;

        // Re-check under the lock: a refresh we queued behind may have
        // already filled the cache.
        let stale = self.store.get_cached_file(filename).await?;
        if let Some(entry) = &stale {
            if self.is_fresh(entry) {
                return Ok(entry.clone());
            }
        }

        let result = self.gateway.read_file(filename).await;
        if result.ok {
            let content = result
                .payload
                .as_ref()
                .and_then(|p| p.get("content"))
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string();
            let entry = CachedFile::new(filename, content, Utc::now());
            self.store.upsert_cached_file(&entry).await?;
            debug!(filename = %filename, size = entry.size, "Refreshed cache entry");
            Ok(entry)
        } else if let Some(entry) = stale {
            // Partial staleness is preferable to unavailability
            warn!(
                filename = %filename,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Refresh failed, serving stale entry"
            );
            Ok(entry)
        } else {
            Err(CoreError::NotFound {
                entity: "file",
                identifier: filename.to_string(),
            })
        }
    }

    /// Write a file through to the gateway, then the cache.
    ///
    /// The gateway write happens first; if it fails the operation fails as
    /// a whole and the cache keeps its previous content. Empty content is
    /// valid.
    pub async fn put_file(&self, filename: &str, content: &str) -> Result<CachedFile, CoreError> {
        self.check_allowed(filename)?;

        let result = self.gateway.write_file(filename, content).await;
        if !result.ok {
            return Err(match (&result.failure, &result.error) {
                (Some(failure), _) => CoreError::from_failure(failure),
                (None, Some(message)) => CoreError::Gateway(message.clone()),
                (None, None) => CoreError::Gateway("gateway write failed".to_string()),
            });
        }

        let entry = CachedFile::new(filename, content, Utc::now());
        self.store.upsert_cached_file(&entry).await?;

        self.broadcaster
            .broadcast(ChangeNotification::FileUpdated {
                filename: filename.to_string(),
                content: content.to_string(),
            })
            .await;

        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::gateway_client::GatewayTransport;
    use crate::config::{GatewaySettings, RetrySettings};
    use crate::domain::{Command, CommandResult, GatewayFailure};
    use crate::persistence::PersistenceError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// In-memory FileStore for tests.
    struct MemFileStore {
        files: Mutex<HashMap<String, CachedFile>>,
    }

    impl MemFileStore {
        fn new() -> Self {
            Self {
                files: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl FileStore for MemFileStore {
        async fn get_cached_file(
            &self,
            filename: &str,
        ) -> Result<Option<CachedFile>, PersistenceError> {
            Ok(self.files.lock().await.get(filename).cloned())
        }

        async fn upsert_cached_file(&self, entry: &CachedFile) -> Result<(), PersistenceError> {
            self.files
                .lock()
                .await
                .insert(entry.filename.clone(), entry.clone());
            Ok(())
        }
    }

    /// Gateway transport with fixed behavior and a read counter.
    struct FixedTransport {
        reads: AtomicUsize,
        writes: AtomicUsize,
        read_response: Option<String>,
        fail_reads: bool,
        fail_writes: bool,
        read_delay: Duration,
    }

    impl FixedTransport {
        fn serving(content: &str) -> Self {
            Self {
                reads: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
                read_response: Some(content.to_string()),
                fail_reads: false,
                fail_writes: false,
                read_delay: Duration::ZERO,
            }
        }

        fn failing() -> Self {
            Self {
                reads: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
                read_response: None,
                fail_reads: true,
                fail_writes: true,
                read_delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.read_delay = delay;
            self
        }
    }

    #[async_trait]
    impl GatewayTransport for FixedTransport {
        async fn dispatch(
            &self,
            command: &Command,
            _timeout: Duration,
        ) -> Result<CommandResult, GatewayFailure> {
            match command.name.as_str() {
                "read" => {
                    self.reads.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(self.read_delay).await;
                    if self.fail_reads {
                        Err(GatewayFailure::Unreachable {
                            message: "refused".into(),
                        })
                    } else {
                        Ok(CommandResult::success(
                            json!({"content": self.read_response.clone().unwrap_or_default()}),
                        ))
                    }
                }
                "write" => {
                    self.writes.fetch_add(1, Ordering::SeqCst);
                    if self.fail_writes {
                        Ok(CommandResult::gateway_error("write rejected"))
                    } else {
                        Ok(CommandResult::success(json!({"ok": true})))
                    }
                }
                _ => Ok(CommandResult::success(json!({}))),
            }
        }

        async fn fetch_status(&self, _timeout: Duration) -> Result<CommandResult, GatewayFailure> {
            Ok(CommandResult::success(json!({})))
        }
    }

    fn gateway(transport: Arc<FixedTransport>) -> Arc<GatewayClient> {
        Arc::new(GatewayClient::new(
            transport,
            GatewaySettings {
                url: "http://localhost:18789".into(),
                command_timeout_ms: 10_000,
                status_timeout_ms: 5_000,
                retry: RetrySettings {
                    max_attempts: 1,
                    delay_ms: 1,
                },
                status_poll_secs: 30,
            },
        ))
    }

    fn cache(
        store: Arc<MemFileStore>,
        transport: Arc<FixedTransport>,
        broadcaster: Arc<Broadcaster>,
    ) -> WorkspaceFileCache {
        WorkspaceFileCache::new(
            store,
            gateway(transport),
            broadcaster,
            ["SOUL.md".to_string(), "TOOLS.md".to_string()],
            300,
        )
    }

    #[tokio::test]
    async fn test_miss_fetches_and_caches() {
        let store = Arc::new(MemFileStore::new());
        let transport = Arc::new(FixedTransport::serving("hello"));
        let cache = cache(store.clone(), transport.clone(), Arc::new(Broadcaster::new(8)));

        let file = cache.get_file("SOUL.md").await.unwrap();
        assert_eq!(file.filename, "SOUL.md");
        assert_eq!(file.content, "hello");
        assert_eq!(file.size, 5);

        // Second read is a fresh hit: no further gateway call
        let again = cache.get_file("SOUL.md").await.unwrap();
        assert_eq!(again.content, "hello");
        assert_eq!(transport.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forbidden_outside_allow_list() {
        let store = Arc::new(MemFileStore::new());
        let transport = Arc::new(FixedTransport::serving("hello"));
        let cache = cache(store, transport.clone(), Arc::new(Broadcaster::new(8)));

        let err = cache.get_file("NOTES.md").await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden { .. }));
        // Rejected before reaching the gateway
        assert_eq!(transport.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce_to_one_read() {
        let store = Arc::new(MemFileStore::new());
        let transport =
            Arc::new(FixedTransport::serving("hello").with_delay(Duration::from_millis(20)));
        let cache = Arc::new(cache(
            store,
            transport.clone(),
            Arc::new(Broadcaster::new(8)),
        ));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            handles.push(tokio::spawn(
                async move { cache.get_file("SOUL.md").await },
            ));
        }
        for handle in handles {
            let file = handle.await.unwrap().unwrap();
            assert_eq!(file.content, "hello");
        }

        assert_eq!(transport.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_served_when_refresh_fails() {
        let store = Arc::new(MemFileStore::new());
        // Seed an entry that is already past the staleness window
        let old = CachedFile {
            filename: "SOUL.md".into(),
            content: "hello".into(),
            size: 5,
            last_modified: Utc::now() - ChronoDuration::seconds(600),
        };
        store.upsert_cached_file(&old).await.unwrap();

        let transport = Arc::new(FixedTransport::failing());
        let cache = cache(store, transport, Arc::new(Broadcaster::new(8)));

        let file = cache.get_file("SOUL.md").await.unwrap();
        assert_eq!(file.content, "hello");
    }

    #[tokio::test]
    async fn test_miss_with_failing_gateway_is_not_found() {
        let store = Arc::new(MemFileStore::new());
        let transport = Arc::new(FixedTransport::failing());
        let cache = cache(store, transport, Arc::new(Broadcaster::new(8)));

        let err = cache.get_file("SOUL.md").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_write_through_updates_cache_and_broadcasts() {
        let store = Arc::new(MemFileStore::new());
        let transport = Arc::new(FixedTransport::serving(""));
        let broadcaster = Arc::new(Broadcaster::new(8));
        let cache = cache(store.clone(), transport.clone(), broadcaster.clone());

        let (_id, mut rx) = broadcaster.register().await;
        rx.recv().await.unwrap(); // initial status

        let file = cache.put_file("SOUL.md", "hi").await.unwrap();
        assert_eq!(file.size, 2);
        assert_eq!(transport.writes.load(Ordering::SeqCst), 1);

        let cached = store.get_cached_file("SOUL.md").await.unwrap().unwrap();
        assert_eq!(cached.content, "hi");

        let msg = rx.recv().await.unwrap();
        let parsed: ChangeNotification = serde_json::from_str(&msg).unwrap();
        assert!(matches!(
            parsed,
            ChangeNotification::FileUpdated { filename, content }
                if filename == "SOUL.md" && content == "hi"
        ));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache_unchanged() {
        let store = Arc::new(MemFileStore::new());
        let prior = CachedFile::new("SOUL.md", "hello", Utc::now());
        store.upsert_cached_file(&prior).await.unwrap();

        let transport = Arc::new(FixedTransport::failing());
        let cache = cache(store.clone(), transport, Arc::new(Broadcaster::new(8)));

        let err = cache.put_file("SOUL.md", "hi").await.unwrap_err();
        assert!(matches!(err, CoreError::Gateway(_)));

        // The previously cached content survives
        let cached = store.get_cached_file("SOUL.md").await.unwrap().unwrap();
        assert_eq!(cached.content, "hello");

        let read_back = cache.get_file("SOUL.md").await.unwrap();
        assert_eq!(read_back.content, "hello");
    }

    #[tokio::test]
    async fn test_empty_content_is_valid() {
        let store = Arc::new(MemFileStore::new());
        let transport = Arc::new(FixedTransport::serving(""));
        let cache = cache(store, transport, Arc::new(Broadcaster::new(8)));

        let file = cache.put_file("SOUL.md", "").await.unwrap();
        assert_eq!(file.size, 0);
        assert_eq!(file.content, "");
    }
}
