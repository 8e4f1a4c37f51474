//! Content-addressed cache for expensive external calls.
//!
//! Three namespaces (script, audio, visual) keyed by stable fingerprints of
//! the inputs. `get_or_compute` is single-flight: for any (namespace, key)
//! at most one producer runs per concurrent batch of callers; the rest wait
//! for and reuse its result. Producer failures are never memoised.
//!
//! TTLs are hints; the resource governor may call [`CacheLayer::evict_until`]
//! earlier under memory pressure, which sheds least-recently-used entries
//! across all namespaces.

pub mod keys;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, warn};

/// Cache namespace, one per expensive external call family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Script,
    Audio,
    Visual,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Script => "script",
            Namespace::Audio => "audio",
            Namespace::Visual => "visual",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub script_ttl: Duration,
    pub audio_ttl: Duration,
    pub visual_ttl: Duration,
    /// Budget used by `evict_until` to translate a target fraction into a
    /// byte ceiling for the serialized entries.
    pub max_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            script_ttl: Duration::from_secs(24 * 3600),
            audio_ttl: Duration::from_secs(24 * 3600),
            visual_ttl: Duration::from_secs(24 * 3600),
            max_bytes: 256 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            script_ttl: env_hours("EDVID_CACHE_SCRIPT_TTL_HOURS", defaults.script_ttl),
            audio_ttl: env_hours("EDVID_CACHE_AUDIO_TTL_HOURS", defaults.audio_ttl),
            visual_ttl: env_hours("EDVID_CACHE_VISUAL_TTL_HOURS", defaults.visual_ttl),
            max_bytes: std::env::var("EDVID_CACHE_MAX_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_bytes),
        }
    }

    fn ttl_for(&self, namespace: Namespace) -> Duration {
        match namespace {
            Namespace::Script => self.script_ttl,
            Namespace::Audio => self.audio_ttl,
            Namespace::Visual => self.visual_ttl,
        }
    }
}

fn env_hours(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(|h| Duration::from_secs(h * 3600))
        .unwrap_or(default)
}

/// Hit/miss counters for health reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub bytes: usize,
}

struct Entry {
    value: serde_json::Value,
    size: usize,
    inserted_at: Instant,
    last_used: Instant,
    ttl: Duration,
}

impl Entry {
    fn expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

type Key = (Namespace, String);

/// What a `get_or_compute` caller is doing for a given key.
enum Role {
    /// This caller computes; the sender signals completion to waiters.
    Leader(watch::Sender<bool>),
    /// Another caller is computing; wait on its channel and re-check.
    Waiter(watch::Receiver<bool>),
}

/// Process-wide content cache with single-flight coalescing.
pub struct CacheLayer {
    config: CacheConfig,
    entries: RwLock<HashMap<Key, Entry>>,
    in_flight: Mutex<HashMap<Key, watch::Receiver<bool>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheLayer {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get the cached value for (namespace, key), or run `producer` to
    /// compute it.
    ///
    /// Concurrent callers for the same key coalesce onto one producer run;
    /// callers for different keys proceed in parallel. A failed producer
    /// leaves no entry behind, and one of the waiting callers takes over as
    /// the next producer.
    pub async fn get_or_compute<T, F, Fut, E>(
        &self,
        namespace: Namespace,
        key: &str,
        producer: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let full_key: Key = (namespace, key.to_string());
        let mut producer = Some(producer);

        loop {
            if let Some(value) = self.lookup::<T>(&full_key).await {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }

            // Become the leader for this key, or pick up the in-flight
            // receiver to wait on.
            let role = {
                let mut in_flight = self.in_flight.lock().await;
                if let Some(rx) = in_flight.get(&full_key) {
                    Role::Waiter(rx.clone())
                } else {
                    let (tx, rx) = watch::channel(false);
                    in_flight.insert(full_key.clone(), rx);
                    Role::Leader(tx)
                }
            };

            match role {
                Role::Leader(tx) => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    let Some(producer) = producer.take() else {
                        // The leader branch runs at most once per call:
                        // afterwards we either returned or became a waiter.
                        unreachable!("producer consumed twice");
                    };
                    let result = producer().await;

                    if let Ok(value) = &result {
                        self.insert(&full_key, value).await;
                    }
                    self.in_flight.lock().await.remove(&full_key);
                    let _ = tx.send(true);

                    return result;
                }
                Role::Waiter(mut rx) => {
                    debug!(namespace = %namespace, key, "waiting on in-flight producer");
                    // Wakes immediately if the producer already finished. An
                    // Err means the leader was dropped (e.g. cancelled
                    // mid-compute): clear its stale registration so a waiter
                    // can take over.
                    if rx.wait_for(|done| *done).await.is_err() {
                        let mut in_flight = self.in_flight.lock().await;
                        if let Some(existing) = in_flight.get(&full_key) {
                            if existing.same_channel(&rx) {
                                in_flight.remove(&full_key);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &Key) -> Option<T> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(key)?;

        if entry.expired() {
            entries.remove(key);
            return None;
        }

        entry.last_used = Instant::now();
        match serde_json::from_value(entry.value.clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                // Type mismatch for this key; drop the entry and recompute.
                warn!(key = %key.1, "cache entry failed to deserialize: {e}");
                entries.remove(key);
                None
            }
        }
    }

    async fn insert<T: Serialize>(&self, key: &Key, value: &T) {
        let json = match serde_json::to_value(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %key.1, "value not cacheable: {e}");
                return;
            }
        };
        let size = json.to_string().len();
        let now = Instant::now();
        self.entries.write().await.insert(
            key.clone(),
            Entry {
                value: json,
                size,
                inserted_at: now,
                last_used: now,
                ttl: self.config.ttl_for(key.0),
            },
        );
    }

    /// Drop one entry.
    pub async fn invalidate(&self, namespace: Namespace, key: &str) {
        self.entries
            .write()
            .await
            .remove(&(namespace, key.to_string()));
    }

    /// Drop every entry in a namespace.
    pub async fn invalidate_all(&self, namespace: Namespace) {
        self.entries
            .write()
            .await
            .retain(|(ns, _), _| *ns != namespace);
    }

    /// Evict expired then least-recently-used entries until the serialized
    /// footprint is at most `target_fraction` of the configured byte budget.
    /// Returns the number of entries removed.
    pub async fn evict_until(&self, target_fraction: f64) -> usize {
        let target_bytes =
            (self.config.max_bytes as f64 * target_fraction.clamp(0.0, 1.0)) as usize;
        let mut entries = self.entries.write().await;
        let before = entries.len();

        entries.retain(|_, entry| !entry.expired());

        let mut total: usize = entries.values().map(|e| e.size).sum();
        while total > target_bytes && !entries.is_empty() {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            let Some(key) = oldest else { break };
            if let Some(entry) = entries.remove(&key) {
                total -= entry.size;
            }
        }

        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "cache eviction pass");
        }
        evicted
    }

    /// Hit/miss counters and current footprint.
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries.len(),
            bytes: entries.values().map(|e| e.size).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn cache() -> CacheLayer {
        CacheLayer::new(CacheConfig::default())
    }

    #[tokio::test]
    async fn test_second_call_hits_without_producer() {
        let cache = cache();
        let runs = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Result<String, &str> = cache
                .get_or_compute(Namespace::Script, "k", || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    async { Ok("v".to_string()) }
                })
                .await;
            assert_eq!(value.unwrap(), "v");
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_single_flight_coalesces_concurrent_callers() {
        let cache = Arc::new(cache());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(Namespace::Audio, "same-key", move || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        async move {
                            tokio::time::sleep(Duration::from_millis(30)).await;
                            Ok::<_, String>(42u32)
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_memoised() {
        let cache = cache();
        let runs = AtomicUsize::new(0);

        let first: Result<u32, String> = cache
            .get_or_compute(Namespace::Visual, "k", || {
                runs.fetch_add(1, Ordering::SeqCst);
                async { Err("renderer down".to_string()) }
            })
            .await;
        assert!(first.is_err());

        let second: Result<u32, String> = cache
            .get_or_compute(Namespace::Visual, "k", || {
                runs.fetch_add(1, Ordering::SeqCst);
                async { Ok(9) }
            })
            .await;
        assert_eq!(second.unwrap(), 9);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_coalesce() {
        let cache = Arc::new(cache());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..4 {
            let cache = Arc::clone(&cache);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(Namespace::Visual, &format!("key-{i}"), move || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        async move { Ok::<_, String>(i) }
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let cache = cache();
        let runs = AtomicUsize::new(0);

        let compute = |runs: &AtomicUsize| {
            runs.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>("x".to_string()) }
        };

        let _: Result<String, _> = cache
            .get_or_compute(Namespace::Script, "k", || compute(&runs))
            .await;
        cache.invalidate(Namespace::Script, "k").await;
        let _: Result<String, _> = cache
            .get_or_compute(Namespace::Script, "k", || compute(&runs))
            .await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_miss() {
        let cache = CacheLayer::new(CacheConfig {
            script_ttl: Duration::from_millis(0),
            ..CacheConfig::default()
        });
        let runs = AtomicUsize::new(0);

        for _ in 0..2 {
            let _: Result<String, String> = cache
                .get_or_compute(Namespace::Script, "k", || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    async { Ok("v".to_string()) }
                })
                .await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_evict_until_sheds_lru_first() {
        let cache = CacheLayer::new(CacheConfig {
            max_bytes: 64,
            ..CacheConfig::default()
        });

        let _: Result<String, String> = cache
            .get_or_compute(Namespace::Script, "old", || async {
                Ok("aaaaaaaaaaaaaaaaaaaaaaaa".to_string())
            })
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _: Result<String, String> = cache
            .get_or_compute(Namespace::Script, "new", || async {
                Ok("bbbbbbbbbbbbbbbbbbbbbbbb".to_string())
            })
            .await;

        // Touch "old" so "new" becomes the LRU victim... then re-touch so
        // "old" is most recent.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _: Result<String, String> = cache
            .get_or_compute(Namespace::Script, "old", || async {
                Ok("unused".to_string())
            })
            .await;

        let evicted = cache.evict_until(0.5).await;
        assert!(evicted >= 1);

        // The most recently used key survives.
        let runs = AtomicUsize::new(0);
        let _: Result<String, String> = cache
            .get_or_compute(Namespace::Script, "old", || {
                runs.fetch_add(1, Ordering::SeqCst);
                async { Ok("recomputed".to_string()) }
            })
            .await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalidate_all_clears_namespace_only() {
        let cache = cache();
        let _: Result<u32, String> = cache
            .get_or_compute(Namespace::Script, "a", || async { Ok(1) })
            .await;
        let _: Result<u32, String> = cache
            .get_or_compute(Namespace::Audio, "b", || async { Ok(2) })
            .await;

        cache.invalidate_all(Namespace::Script).await;

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 1);
    }
}
