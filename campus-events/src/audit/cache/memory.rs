//! In-process hot cache

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::HotCache;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct State {
    values: HashMap<String, (String, Instant)>,
    scores: HashMap<String, i64>,
    index: BTreeSet<(i64, String)>,
}

/// Hot cache kept in process memory
///
/// Honours TTLs lazily on read. The availability switches let tests
/// simulate a cache outage or a crash between persistent write and cache
/// cleanup.
#[derive(Debug, Default)]
pub struct MemoryHotCache {
    state: Mutex<State>,
    unavailable: AtomicBool,
    fail_removes: AtomicBool,
}

impl MemoryHotCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `CacheUnavailable`
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make `remove` fail while other operations keep working
    pub fn set_fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }

    /// Drop a value but keep its index entry, as an expiry would
    pub fn expire(&self, key: &str) {
        self.lock().values.remove(key);
    }

    /// Whether a value is currently stored under `key`
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lock()
            .values
            .get(key)
            .is_some_and(|(_, expires)| *expires > Instant::now())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::CacheUnavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HotCache for MemoryHotCache {
    async fn put(&self, key: &str, payload: &str, ttl: Duration, score: i64) -> Result<()> {
        self.check_available()?;
        let mut state = self.lock();
        state
            .values
            .insert(key.to_string(), (payload.to_string(), Instant::now() + ttl));
        if let Some(previous) = state.scores.insert(key.to_string(), score) {
            state.index.remove(&(previous, key.to_string()));
        }
        state.index.insert((score, key.to_string()));
        Ok(())
    }

    async fn due(&self, max_score: i64, offset: usize, limit: usize) -> Result<Vec<String>> {
        self.check_available()?;
        let state = self.lock();
        Ok(state
            .index
            .iter()
            .take_while(|(score, _)| *score <= max_score)
            .skip(offset)
            .take(limit)
            .map(|(_, key)| key.clone())
            .collect())
    }

    async fn fetch(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        let mut state = self.lock();
        match state.values.get(key) {
            Some((payload, expires)) if *expires > Instant::now() => Ok(Some(payload.clone())),
            Some(_) => {
                state.values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_available()?;
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(Error::CacheUnavailable("remove timed out".into()));
        }
        let mut state = self.lock();
        state.values.remove(key);
        if let Some(score) = state.scores.remove(key) {
            state.index.remove(&(score, key.to_string()));
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        self.check_available()?;
        Ok(self.lock().index.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    #[tokio::test]
    async fn test_put_fetch_remove() {
        let cache = MemoryHotCache::new();
        cache.put("a", "payload", DAY, 10).await.unwrap();
        assert_eq!(cache.fetch("a").await.unwrap().as_deref(), Some("payload"));
        assert_eq!(cache.len().await.unwrap(), 1);

        cache.remove("a").await.unwrap();
        assert_eq!(cache.fetch("a").await.unwrap(), None);
        assert_eq!(cache.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_due_orders_by_score_and_pages() {
        let cache = MemoryHotCache::new();
        cache.put("late", "x", DAY, 30).await.unwrap();
        cache.put("early", "x", DAY, 10).await.unwrap();
        cache.put("middle", "x", DAY, 20).await.unwrap();
        cache.put("future", "x", DAY, 99).await.unwrap();

        assert_eq!(cache.due(50, 0, 10).await.unwrap(), vec!["early", "middle", "late"]);
        assert_eq!(cache.due(50, 1, 1).await.unwrap(), vec!["middle"]);
        assert!(cache.due(5, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ttl_expires_value_not_index() {
        let cache = MemoryHotCache::new();
        cache.put("k", "x", Duration::ZERO, 1).await.unwrap();
        assert_eq!(cache.fetch("k").await.unwrap(), None);
        assert_eq!(cache.due(1, 0, 10).await.unwrap(), vec!["k"]);
    }

    #[tokio::test]
    async fn test_outage_switch() {
        let cache = MemoryHotCache::new();
        cache.set_available(false);
        assert!(matches!(
            cache.put("k", "x", DAY, 1).await,
            Err(Error::CacheUnavailable(_))
        ));
        cache.set_available(true);
        assert!(cache.put("k", "x", DAY, 1).await.is_ok());
    }
}
