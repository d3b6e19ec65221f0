use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Entries idle longer than this are evicted.
    pub ttl: Duration,
    /// Characters per retrieval page.
    pub max_fetch_size: usize,
    /// Inline preview length before a field is cached.
    pub preview_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(900),
            max_fetch_size: 5000,
            preview_size: 2000,
        }
    }
}

struct CacheEntry {
    content: String,
    created_at: Instant,
    last_access: Instant,
}

/// One page of a cached field body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePage {
    pub content: String,
    pub page: usize,
    pub total_pages: usize,
    pub has_more: bool,
}

/// Handle to the background evictor task; dropping or stopping it halts
/// eviction without touching the cache itself.
pub struct EvictorHandle {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl EvictorHandle {
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// TTL-bounded store of large payload field bodies keyed by opaque
/// handles. Retrieval is paged; a missing or expired handle reports
/// `cache_expired` and the caller re-runs its query.
#[derive(Clone)]
pub struct PayloadCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    config: CacheConfig,
}

impl PayloadCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store a field body, returning its opaque handle.
    #[must_use]
    pub fn store(&self, content: String) -> String {
        let handle = uuid::Uuid::new_v4().to_string();
        let now = Instant::now();
        self.entries
            .lock()
            .expect("payload cache poisoned")
            .insert(
                handle.clone(),
                CacheEntry {
                    content,
                    created_at: now,
                    last_access: now,
                },
            );
        handle
    }

    /// Fetch one page of `max_fetch_size` characters.
    pub fn retrieve(&self, handle: &str, page: usize) -> Result<CachePage> {
        let mut entries = self.entries.lock().expect("payload cache poisoned");
        let entry = entries.get_mut(handle).ok_or(QueryError::CacheExpired)?;
        if entry.created_at.elapsed() > self.config.ttl {
            entries.remove(handle);
            return Err(QueryError::CacheExpired);
        }
        entry.last_access = Instant::now();

        let chars: Vec<char> = entry.content.chars().collect();
        let page_size = self.config.max_fetch_size.max(1);
        let total_pages = chars.len().div_ceil(page_size).max(1);
        if page >= total_pages {
            return Err(QueryError::InvalidQuery(format!(
                "page {page} out of range (total_pages={total_pages})"
            )));
        }

        let start = page * page_size;
        let end = (start + page_size).min(chars.len());
        Ok(CachePage {
            content: chars[start..end].iter().collect(),
            page,
            total_pages,
            has_more: page + 1 < total_pages,
        })
    }

    /// Drop expired entries; returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.entries.lock().expect("payload cache poisoned");
        let ttl = self.config.ttl;
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at.elapsed() <= ttl);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().expect("payload cache poisoned").clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("payload cache poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the periodic eviction task.
    #[must_use]
    pub fn start_evictor(&self, interval: Duration) -> EvictorHandle {
        let cache = self.clone();
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = cancel_task.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = cache.evict_expired();
                        if evicted > 0 {
                            log::debug!("Payload cache evicted {evicted} expired entries");
                        }
                    }
                }
            }
        });
        EvictorHandle { cancel, handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cache_with(ttl: Duration) -> PayloadCache {
        PayloadCache::new(CacheConfig {
            ttl,
            ..CacheConfig::default()
        })
    }

    #[test]
    fn single_page_content_has_no_more() {
        let cache = cache_with(Duration::from_secs(60));
        let handle = cache.store("x".repeat(3000));
        let page = cache.retrieve(&handle, 0).unwrap();
        assert_eq!(page.content.len(), 3000);
        assert_eq!(page.page, 0);
        assert_eq!(page.total_pages, 1);
        assert!(!page.has_more);
    }

    #[test]
    fn ten_thousand_chars_split_into_two_pages() {
        let cache = cache_with(Duration::from_secs(60));
        let content = format!("{}{}", "A".repeat(5000), "B".repeat(5000));
        let handle = cache.store(content);

        let first = cache.retrieve(&handle, 0).unwrap();
        assert_eq!(first.content, "A".repeat(5000));
        assert_eq!(first.total_pages, 2);
        assert!(first.has_more);

        let second = cache.retrieve(&handle, 1).unwrap();
        assert_eq!(second.content, "B".repeat(5000));
        assert!(!second.has_more);
    }

    #[test]
    fn retrieve_returns_non_empty_prefix() {
        let cache = cache_with(Duration::from_secs(60));
        let handle = cache.store("hello world".to_string());
        let page = cache.retrieve(&handle, 0).unwrap();
        assert!("hello world".starts_with(&page.content));
        assert!(!page.content.is_empty());
    }

    #[test]
    fn unknown_handle_is_cache_expired() {
        let cache = cache_with(Duration::from_secs(60));
        assert!(matches!(
            cache.retrieve("no-such-handle", 0),
            Err(QueryError::CacheExpired)
        ));
    }

    #[test]
    fn expired_entry_is_cache_expired() {
        let cache = cache_with(Duration::from_millis(0));
        let handle = cache.store("data".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(
            cache.retrieve(&handle, 0),
            Err(QueryError::CacheExpired)
        ));
    }

    #[test]
    fn out_of_range_page_is_invalid() {
        let cache = cache_with(Duration::from_secs(60));
        let handle = cache.store("short".to_string());
        assert!(matches!(
            cache.retrieve(&handle, 3),
            Err(QueryError::InvalidQuery(_))
        ));
    }

    #[test]
    fn evict_expired_removes_old_entries() {
        let cache = cache_with(Duration::from_millis(0));
        let _ = cache.store("a".to_string());
        let _ = cache.store("b".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.evict_expired(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn evictor_task_stops_cleanly() {
        let cache = cache_with(Duration::from_secs(60));
        let evictor = cache.start_evictor(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        evictor.stop().await;
    }
}
