use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CacheConfig, CacheType};
use crate::error::CacheError;
use crate::metrics::{CACHE_HITS, CACHE_MISSES, CACHE_SIZE, Collector, Metrics};

/// Point-in-time cache occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub size_bytes: u64,
}

/// Byte-level cache backend. Expired entries must read as misses.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn clear(&self) -> Result<(), CacheError>;
    /// Drop every expired entry, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, CacheError>;
    fn stats(&self) -> CacheStats;
}

// Create a cache key (hash of all parts)
pub fn make_cache_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Longest ttl a backend will honour; longer ones are clamped.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

fn clamp_ttl(ttl: Duration) -> Duration {
    ttl.min(MAX_TTL)
}

// a value larger than the whole cache is refused rather than evicting everything
fn check_fits(key: &str, incoming: u64, max_size: u64) -> Result<(), CacheError> {
    if max_size > 0 && incoming > max_size {
        return Err(CacheError::Backend(format!(
            "value for {key} exceeds cache capacity ({incoming} > {max_size} bytes)"
        )));
    }
    Ok(())
}

// Cache entry with expiry
#[derive(Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, CacheEntry>,
    size: u64,
}

impl MemoryState {
    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.size -= entry.value.len() as u64;
                true
            }
            None => false,
        }
    }

    // nearest expiry goes first; no access time is tracked
    fn evict_one(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(key, _)| key.clone());
        match victim {
            Some(key) => {
                debug!(key = %key, "evicting cache entry");
                self.remove(&key)
            }
            None => false,
        }
    }
}

/// In-process cache bounded by total value bytes.
pub struct MemoryCache {
    state: RwLock<MemoryState>,
    max_size: u64,
}

impl MemoryCache {
    /// `max_size` of 0 disables eviction.
    pub fn new(max_size: u64) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            max_size,
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let now = Instant::now();
        {
            let state = self.state.read();
            match state.entries.get(key) {
                None => return Err(CacheError::NotFound(key.to_string())),
                Some(entry) if !entry.is_expired(now) => return Ok(entry.value.clone()),
                Some(_) => {}
            }
        }
        let mut state = self.state.write();
        // a concurrent set may have replaced the expired value
        if let Some(entry) = state.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(entry.value.clone());
            }
            state.remove(key);
        }
        Err(CacheError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let incoming = value.len() as u64;
        check_fits(key, incoming, self.max_size)?;
        let mut state = self.state.write();
        state.remove(key);
        if self.max_size > 0 {
            while state.size + incoming > self.max_size && state.evict_one() {}
        }
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + clamp_ttl(ttl),
            },
        );
        state.size += incoming;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.state.write().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut state = self.state.write();
        state.entries.clear();
        state.size = 0;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let mut state = self.state.write();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        Ok(expired.len())
    }

    fn stats(&self) -> CacheStats {
        let state = self.state.read();
        CacheStats {
            entries: state.entries.len() as u64,
            size_bytes: state.size,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct DiskEnvelope {
    key: String,
    expires_at_ms: i64,
    value: Vec<u8>,
}

impl DiskEnvelope {
    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// One JSON file per key under a directory; survives restarts.
pub struct DiskCache {
    dir: PathBuf,
    max_size: u64,
    size: AtomicU64,
    entries: AtomicU64,
    lock: tokio::sync::RwLock<()>,
}

impl DiskCache {
    pub async fn open(dir: impl AsRef<Path>, max_size: u64) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        let cache = Self {
            dir,
            max_size,
            size: AtomicU64::new(0),
            entries: AtomicU64::new(0),
            lock: tokio::sync::RwLock::new(()),
        };
        for (_, len) in cache.list_files().await? {
            cache.size.fetch_add(len, Ordering::Relaxed);
            cache.entries.fetch_add(1, Ordering::Relaxed);
        }
        info!(dir = %cache.dir.display(), entries = cache.entries.load(Ordering::Relaxed), "disk cache opened");
        Ok(cache)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", make_cache_key(&[key])))
    }

    async fn list_files(&self) -> Result<Vec<(PathBuf, u64)>, CacheError> {
        let mut files = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push((path, entry.metadata().await?.len()));
            }
        }
        Ok(files)
    }

    async fn read_envelope(path: &Path) -> Result<Option<DiskEnvelope>, CacheError> {
        match tokio::fs::read(path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // caller holds the write guard
    async fn remove_file(&self, path: &Path) -> Result<bool, CacheError> {
        let len = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        tokio::fs::remove_file(path).await?;
        self.size.fetch_sub(len, Ordering::Relaxed);
        self.entries.fetch_sub(1, Ordering::Relaxed);
        Ok(true)
    }

    // caller holds the write guard
    async fn evict_one(&self) -> Result<bool, CacheError> {
        let mut victim: Option<(PathBuf, i64)> = None;
        for (path, _) in self.list_files().await? {
            let expires_at = match Self::read_envelope(&path).await {
                Ok(Some(envelope)) => envelope.expires_at_ms,
                Ok(None) => continue,
                // unreadable files go first
                Err(_) => i64::MIN,
            };
            if victim.as_ref().is_none_or(|(_, at)| expires_at < *at) {
                victim = Some((path, expires_at));
            }
        }
        match victim {
            Some((path, _)) => self.remove_file(&path).await,
            None => Ok(false),
        }
    }
}

#[async_trait]
impl CacheBackend for DiskCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let path = self.path_for(key);
        let now_ms = chrono::Utc::now().timestamp_millis();
        {
            let _guard = self.lock.read().await;
            match Self::read_envelope(&path).await? {
                None => return Err(CacheError::NotFound(key.to_string())),
                Some(envelope) if !envelope.is_expired(now_ms) => return Ok(envelope.value),
                Some(_) => {}
            }
        }
        let _guard = self.lock.write().await;
        if let Some(envelope) = Self::read_envelope(&path).await? {
            if !envelope.is_expired(now_ms) {
                return Ok(envelope.value);
            }
            self.remove_file(&path).await?;
        }
        Err(CacheError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let envelope = DiskEnvelope {
            key: key.to_string(),
            expires_at_ms: chrono::Utc::now()
                .timestamp_millis()
                .saturating_add(clamp_ttl(ttl).as_millis() as i64),
            value,
        };
        let raw = serde_json::to_vec(&envelope)?;
        let incoming = raw.len() as u64;
        check_fits(key, incoming, self.max_size)?;
        let path = self.path_for(key);

        let _guard = self.lock.write().await;
        self.remove_file(&path).await?;
        if self.max_size > 0 {
            while self.size.load(Ordering::Relaxed) + incoming > self.max_size
                && self.evict_one().await?
            {}
        }
        tokio::fs::write(&path, &raw).await?;
        self.size.fetch_add(incoming, Ordering::Relaxed);
        self.entries.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let _guard = self.lock.write().await;
        self.remove_file(&self.path_for(key)).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.lock.write().await;
        for (path, _) in self.list_files().await? {
            self.remove_file(&path).await?;
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let _guard = self.lock.write().await;
        let mut removed = 0;
        for (path, _) in self.list_files().await? {
            let expired = match Self::read_envelope(&path).await {
                Ok(Some(envelope)) => envelope.is_expired(now_ms),
                Ok(None) => false,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "dropping unreadable cache file");
                    true
                }
            };
            if expired && self.remove_file(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.load(Ordering::Relaxed),
            size_bytes: self.size.load(Ordering::Relaxed),
        }
    }
}

/// Typed facade over a backend. Values are stored as JSON so any backend
/// can carry them.
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
    sweeper: CancellationToken,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: Duration) -> Self {
        Self {
            backend,
            default_ttl,
            sweeper: CancellationToken::new(),
        }
    }

    /// Like `new`, plus a periodic expiry sweep that stops when the store drops.
    pub fn with_sweeper(
        backend: Arc<dyn CacheBackend>,
        default_ttl: Duration,
        every: Duration,
    ) -> Self {
        let store = Self::new(backend, default_ttl);
        spawn_sweeper(Arc::downgrade(&store.backend), every, store.sweeper.clone());
        store
    }

    pub async fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let backend: Arc<dyn CacheBackend> = match config.cache_type {
            CacheType::Memory => Arc::new(MemoryCache::new(config.max_size)),
            CacheType::Disk => Arc::new(DiskCache::open(&config.path, config.max_size).await?),
        };
        Ok(Self::with_sweeper(backend, config.ttl, config.sweep_interval))
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        let raw = match self.backend.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                if e.is_miss() {
                    CACHE_MISSES.inc();
                }
                return Err(e);
            }
        };
        CACHE_HITS.inc();
        serde_json::from_slice(&raw).map_err(|e| {
            warn!(key = %key, error = %e, "failed to decode cached value");
            CacheError::Serialization(e)
        })
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let raw = serde_json::to_vec(value)?;
        self.backend
            .set(key, raw, ttl.unwrap_or(self.default_ttl))
            .await?;
        CACHE_SIZE.set(self.backend.stats().size_bytes as f64);
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.backend.delete(key).await?;
        CACHE_SIZE.set(self.backend.stats().size_bytes as f64);
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.backend.clear().await?;
        CACHE_SIZE.set(0.0);
        Ok(())
    }

    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        let removed = self.backend.purge_expired().await?;
        CACHE_SIZE.set(self.backend.stats().size_bytes as f64);
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        self.backend.stats()
    }

    /// Relief hook for the memory watcher; does nothing once the store is gone.
    pub fn relief_hook(store: &Arc<CacheStore>) -> impl Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static {
        let weak = Arc::downgrade(store);
        move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(store) = weak.upgrade() {
                    match store.purge_expired().await {
                        Ok(removed) => info!(removed, "cache purged under memory pressure"),
                        Err(e) => warn!(error = %e, "cache purge failed"),
                    }
                }
            })
        }
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

impl Collector for CacheStore {
    fn name(&self) -> &str {
        "cache"
    }

    fn collect(&self, metrics: &mut Metrics) {
        metrics.cache = self.stats();
    }
}

fn spawn_sweeper(backend: Weak<dyn CacheBackend>, every: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(backend) = backend.upgrade() else { break };
                    match backend.purge_expired().await {
                        Ok(0) => {}
                        Ok(removed) => debug!(removed, "cache sweep removed expired entries"),
                        Err(e) => warn!(error = %e, "cache sweep failed"),
                    }
                    CACHE_SIZE.set(backend.stats().size_bytes as f64);
                }
            }
        }
        debug!("cache sweeper stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::sleep;

    fn store(max_size: u64) -> CacheStore {
        CacheStore::new(Arc::new(MemoryCache::new(max_size)), Duration::from_secs(60))
    }

    #[test]
    fn test_cache_key_is_stable_and_separated() {
        assert_eq!(make_cache_key(&["a", "b"]), make_cache_key(&["a", "b"]));
        assert_ne!(make_cache_key(&["ab", ""]), make_cache_key(&["a", "b"]));
        assert_eq!(make_cache_key(&["x"]).len(), 64);
    }

    #[tokio::test]
    async fn test_round_trip_before_expiry() {
        let cache = store(0);
        let value = json!({"title": "video", "views": 12345});
        cache
            .set("k", &value, Some(Duration::from_millis(100)))
            .await
            .unwrap();
        let got: serde_json::Value = cache.get("k").await.unwrap();
        assert_eq!(got, value);
    }

    #[tokio::test]
    async fn test_expired_read_is_a_miss_and_removes_entry() {
        let cache = store(0);
        cache
            .set("k", &"v", Some(Duration::from_millis(100)))
            .await
            .unwrap();
        sleep(Duration::from_millis(150)).await;
        let err = cache.get::<String>("k").await.unwrap_err();
        assert!(err.is_miss());
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().size_bytes, 0);
    }

    #[tokio::test]
    async fn test_decode_failure_is_not_a_miss() {
        let cache = store(0);
        cache.set("k", &"text", None).await.unwrap();
        let err = cache.get::<u64>("k").await.unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_size_stays_within_capacity() {
        // each value serializes to 12 bytes: a quoted 10-char string
        let capacity = 100;
        let cache = store(capacity);
        for i in 0..50 {
            let value = format!("value-{i:04}");
            cache.set(&format!("key-{i}"), &value, None).await.unwrap();
            assert!(cache.stats().size_bytes <= capacity);
        }
        assert_eq!(cache.stats().entries, 8);
    }

    #[tokio::test]
    async fn test_eviction_prefers_nearest_expiry() {
        let cache = store(24);
        cache
            .set("short", &"aaaaaaaaaa", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        cache
            .set("long", &"bbbbbbbbbb", Some(Duration::from_secs(600)))
            .await
            .unwrap();
        cache
            .set("new", &"cccccccccc", Some(Duration::from_secs(300)))
            .await
            .unwrap();
        assert!(cache.get::<String>("short").await.unwrap_err().is_miss());
        assert_eq!(cache.get::<String>("long").await.unwrap(), "bbbbbbbbbb");
        assert_eq!(cache.get::<String>("new").await.unwrap(), "cccccccccc");
    }

    #[tokio::test]
    async fn test_overwrite_replaces_size() {
        let cache = store(0);
        cache.set("k", &"0123456789", None).await.unwrap();
        cache.set("k", &"01", None).await.unwrap();
        assert_eq!(cache.stats(), CacheStats { entries: 1, size_bytes: 4 });
        cache.delete("k").await.unwrap();
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn test_purge_and_clear() {
        let cache = store(0);
        cache.set("a", &1, Some(Duration::from_millis(10))).await.unwrap();
        cache.set("b", &2, Some(Duration::from_secs(60))).await.unwrap();
        sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.get::<i32>("b").await.unwrap(), 2);
        cache.clear().await.unwrap();
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_entries() {
        let backend = Arc::new(MemoryCache::new(0));
        let cache = CacheStore::with_sweeper(
            backend.clone(),
            Duration::from_secs(60),
            Duration::from_millis(20),
        );
        cache.set("a", &"x", Some(Duration::from_millis(5))).await.unwrap();
        sleep(Duration::from_millis(80)).await;
        assert_eq!(backend.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_disk_cache_round_trip_and_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(DiskCache::open(dir.path(), 0).await.unwrap());
        let cache = CacheStore::new(backend.clone(), Duration::from_secs(60));

        cache.set("repos", &vec!["a", "b"], None).await.unwrap();
        cache
            .set("brief", &"soon gone", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(cache.get::<Vec<String>>("repos").await.unwrap(), vec!["a", "b"]);
        assert_eq!(backend.stats().entries, 2);

        sleep(Duration::from_millis(100)).await;
        assert!(cache.get::<String>("brief").await.unwrap_err().is_miss());
        assert_eq!(backend.stats().entries, 1);

        // reopening picks up what is on disk
        let reopened = DiskCache::open(dir.path(), 0).await.unwrap();
        assert_eq!(reopened.stats(), backend.stats());
    }

    #[tokio::test]
    async fn test_disk_cache_evicts_within_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskCache::open(dir.path(), 400).await.unwrap();
        for i in 0..20 {
            backend
                .set(&format!("k{i}"), vec![b'x'; 40], Duration::from_secs(60 + i))
                .await
                .unwrap();
            assert!(backend.stats().size_bytes <= 400);
        }
        assert!(backend.get("k19").await.is_ok());
        assert!(backend.get("k0").await.unwrap_err().is_miss());
    }

    #[tokio::test]
    async fn test_collector_reports_occupancy() {
        let store = store(0);
        store.set("k", &json!({"n": 1}), None).await.unwrap();
        let mut metrics = Metrics::default();
        store.collect(&mut metrics);
        assert_eq!(metrics.cache.entries, 1);
        assert_eq!(metrics.cache, store.stats());
    }

    #[tokio::test]
    async fn test_oversize_value_is_refused_and_keeps_entries() {
        let backend = MemoryCache::new(100);
        for i in 0..8 {
            backend
                .set(&format!("k{i}"), vec![b'x'; 12], Duration::from_secs(60))
                .await
                .unwrap();
        }
        let before = backend.stats();

        let err = backend
            .set("big", vec![b'x'; 200], Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Backend(_)));
        assert_eq!(backend.stats(), before);
        assert!(backend.get("k0").await.is_ok());
        assert!(backend.get("big").await.unwrap_err().is_miss());
    }

    #[tokio::test]
    async fn test_disk_oversize_value_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskCache::open(dir.path(), 400).await.unwrap();
        backend.set("small", vec![b'x'; 10], Duration::from_secs(60)).await.unwrap();
        let before = backend.stats();

        assert!(backend.set("big", vec![b'x'; 1000], Duration::from_secs(60)).await.is_err());
        assert_eq!(backend.stats(), before);
        assert!(backend.get("small").await.is_ok());
    }

    #[tokio::test]
    async fn test_huge_ttl_is_clamped() {
        let backend = MemoryCache::new(0);
        backend.set("forever", vec![1], Duration::MAX).await.unwrap();
        assert!(backend.get("forever").await.is_ok());

        let dir = tempfile::tempdir().unwrap();
        let disk = DiskCache::open(dir.path(), 0).await.unwrap();
        disk.set("forever", vec![1], Duration::MAX).await.unwrap();
        assert!(disk.get("forever").await.is_ok());
    }
}
