//! ttl-cache: a sharded, time-windowed cache with an on-evict hook.
//!
//! Backs both the dedup/aggregation window (§4.6) and the two meta caches
//! (§4.4/§4.6) — same data structure, two instantiations with different TTLs
//! and different uses of the eviction hook. Sharding (default 1024, matching
//! the source's `bigcache.Config{Shards: 1024}`) exists to keep a single
//! hot key from serializing every reader/writer in the fleet behind one
//! lock; each shard carries its own `parking_lot::RwLock`.
//!
//! Cache failures (a shard lock is never actually fallible here, but the
//! contract in spec §7 is "forward through" — treat a cache miss on error
//! as permission to deliver, accepting the idempotency loss for that one
//! message) are expressed by [`DedupOutcome`] rather than a `Result`: there
//! is no recoverable error state in an in-memory cache, only "found" and
//! "not found".

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

struct Shard {
    entries: HashMap<String, Entry>,
}

pub type EvictHook = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Running counters matching spec §4.4's per-meta-cache statistics.
#[derive(Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub del_hits: AtomicU64,
    pub del_misses: AtomicU64,
    pub collisions: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub del_hits: u64,
    pub del_misses: u64,
    pub collisions: u64,
    pub current_count: u64,
}

impl CacheStats {
    fn snapshot(&self, current_count: u64) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            del_hits: self.del_hits.load(Ordering::Relaxed),
            del_misses: self.del_misses.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            current_count,
        }
    }
}

pub struct TtlCache {
    shards: Vec<RwLock<Shard>>,
    ttl: Duration,
    on_evict: Option<EvictHook>,
    stats: CacheStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// First arrival of this key in the current window.
    Miss,
    /// A duplicate within the window; the new mask was appended.
    Hit,
}

fn shard_index(key: &str, shard_count: usize) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash as usize) % shard_count
}

impl TtlCache {
    pub fn new(shards: usize, ttl: Duration) -> Arc<Self> {
        Self::with_evict_hook(shards, ttl, None)
    }

    pub fn with_evict_hook(shards: usize, ttl: Duration, on_evict: Option<EvictHook>) -> Arc<Self> {
        let shard_count = shards.max(1);
        let cache = Arc::new(Self {
            shards: (0..shard_count)
                .map(|_| RwLock::new(Shard { entries: HashMap::new() }))
                .collect(),
            ttl,
            on_evict,
            stats: CacheStats::default(),
        });
        cache
    }

    /// Spawn the periodic sweep that expires entries and fires `on_evict`.
    /// Returns a handle the caller can abort on shutdown (after calling
    /// [`TtlCache::flush`] to deliver the final accounting pass).
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                cache.sweep_expired();
            }
        })
    }

    fn sweep_expired(&self) {
        let now = Instant::now();
        for shard in &self.shards {
            let expired: Vec<(String, Vec<u8>)> = {
                let guard = shard.read();
                guard
                    .entries
                    .iter()
                    .filter(|(_, e)| e.expires_at <= now)
                    .map(|(k, e)| (k.clone(), e.value.clone()))
                    .collect()
            };
            if expired.is_empty() {
                continue;
            }
            let mut guard = shard.write();
            for (key, _) in &expired {
                guard.entries.remove(key);
            }
            drop(guard);
            if let Some(hook) = &self.on_evict {
                for (key, value) in &expired {
                    hook(key, value);
                }
            }
        }
    }

    /// Flush every remaining entry through the eviction hook, removing it.
    /// Called on shutdown so the last accounting pass (spec §5) still runs.
    pub fn flush(&self) {
        for shard in &self.shards {
            let drained: Vec<(String, Vec<u8>)> = {
                let mut guard = shard.write();
                guard.entries.drain().map(|(k, e)| (k, e.value)).collect()
            };
            if let Some(hook) = &self.on_evict {
                for (key, value) in &drained {
                    hook(key, value);
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let idx = shard_index(key, self.shards.len());
        let guard = self.shards[idx].read();
        guard.entries.get(key).map(|e| e.value.clone())
    }

    pub fn put(&self, key: &str, value: Vec<u8>) {
        let idx = shard_index(key, self.shards.len());
        let mut guard = self.shards[idx].write();
        guard.entries.insert(
            key.to_owned(),
            Entry { value, expires_at: Instant::now() + self.ttl },
        );
    }

    pub fn remove(&self, key: &str) -> bool {
        let idx = shard_index(key, self.shards.len());
        let mut guard = self.shards[idx].write();
        guard.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats_snapshot(&self) -> CacheStatsSnapshot {
        self.stats.snapshot(self.len() as u64)
    }

    pub fn record_hit(&self) {
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_collision(&self) {
        self.stats.collisions.fetch_add(1, Ordering::Relaxed);
    }

    /// Probe the dedup cache and append `mask` to the entry's value either
    /// way. This is the corrected branching from spec §9: "if not found ->
    /// emit and add; else -> suppress" — the `Miss` branch is the caller's
    /// cue to emit downstream *before* appending; `Hit` means suppress.
    pub fn probe_and_append(&self, key: &str, mask: &[u8]) -> DedupOutcome {
        let idx = shard_index(key, self.shards.len());
        let mut guard = self.shards[idx].write();
        match guard.entries.get_mut(key) {
            Some(entry) => {
                entry.value.extend_from_slice(mask);
                DedupOutcome::Hit
            }
            None => {
                guard.entries.insert(
                    key.to_owned(),
                    Entry { value: mask.to_vec(), expires_at: Instant::now() + self.ttl },
                );
                DedupOutcome::Miss
            }
        }
    }
}

impl std::fmt::Debug for TtlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("shards", &self.shards.len())
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn probe_and_append_reports_miss_then_hit() {
        let cache = TtlCache::new(4, Duration::from_secs(60));
        assert_eq!(cache.probe_and_append("k1", &[0, 1]), DedupOutcome::Miss);
        assert_eq!(cache.probe_and_append("k1", &[0, 2]), DedupOutcome::Hit);
        assert_eq!(cache.probe_and_append("k1", &[0, 3]), DedupOutcome::Hit);
        let value = cache.get("k1").unwrap();
        assert_eq!(value, vec![0, 1, 0, 2, 0, 3]);
        assert_eq!(value.len() % 2, 0);
    }

    #[test]
    fn put_and_get_round_trip() {
        let cache = TtlCache::new(4, Duration::from_secs(60));
        cache.put("a", b"hello".to_vec());
        assert_eq!(cache.get("a"), Some(b"hello".to_vec()));
        assert_eq!(cache.get("missing"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_expires_entries_and_fires_evict_hook() {
        let evicted: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
        let hook_target = evicted.clone();
        let hook: EvictHook = Arc::new(move |key, value| {
            hook_target.lock().unwrap().push((key.to_owned(), value.to_vec()));
        });
        let cache = TtlCache::with_evict_hook(4, Duration::from_millis(50), Some(hook));
        cache.probe_and_append("room:1", &[0, 1]);

        cache.spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;

        let hits = evicted.lock().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "room:1");
        assert_eq!(hits[0].1, vec![0, 1]);
        assert!(cache.is_empty());
    }

    #[test]
    fn flush_delivers_final_accounting_pass() {
        let evicted: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let hook_target = evicted.clone();
        let hook: EvictHook = Arc::new(move |key, _| hook_target.lock().unwrap().push(key.to_owned()));
        let cache = TtlCache::with_evict_hook(4, Duration::from_secs(600), Some(hook));
        cache.probe_and_append("a", &[0, 1]);
        cache.probe_and_append("b", &[0, 2]);

        cache.flush();

        let names = evicted.lock().unwrap();
        assert_eq!(names.len(), 2);
        assert!(cache.is_empty());
    }
}
