//! meta_indexer: the two identity caches that back the agent's incremental
//! re-publication of user and fans-medal attributes (spec §4.4 steps 1-3,
//! §4.6 meta-cache-stats).
//!
//! Both caches are plain [`TtlCache`] instantiations storing bincode-encoded
//! values; the "miss -> publish + store, hit -> diff -> publish-if-changed"
//! logic lives here rather than in the cache itself, matching how
//! `rawJsonParser.go`'s caller (not the cache) owned the diff decision.

use std::sync::Arc;
use std::time::Duration;

use agent_wire::{FansMedalMeta, UserMeta};
use ttl_cache::TtlCache;

const META_CACHE_SHARDS: usize = 64;
const META_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

pub struct MetaIndexer {
    user_cache: Arc<TtlCache>,
    medal_cache: Arc<TtlCache>,
}

impl MetaIndexer {
    pub fn new() -> Self {
        Self {
            user_cache: TtlCache::new(META_CACHE_SHARDS, META_CACHE_TTL),
            medal_cache: TtlCache::new(META_CACHE_SHARDS, META_CACHE_TTL),
        }
    }

    pub fn spawn_sweepers(&self, interval: Duration) {
        self.user_cache.spawn_sweeper(interval);
        self.medal_cache.spawn_sweeper(interval);
    }

    pub fn user_cache_stats(&self) -> ttl_cache::CacheStatsSnapshot {
        self.user_cache.stats_snapshot()
    }

    pub fn medal_cache_stats(&self) -> ttl_cache::CacheStatsSnapshot {
        self.medal_cache.stats_snapshot()
    }

    /// Returns `Some(user)` when this record should be published — either a
    /// first sighting or a genuine change from the cached record — and
    /// `None` when it's an unchanged repeat.
    pub fn index_user(&self, mut incoming: UserMeta) -> Option<UserMeta> {
        let key = incoming.cache_key();
        match self.user_cache.get(&key) {
            None => {
                self.user_cache.record_miss();
                self.store_user(&key, &incoming);
                Some(incoming)
            }
            Some(bytes) => {
                self.user_cache.record_hit();
                let Ok(prior) = agent_wire::decode::<UserMeta>(&bytes) else {
                    self.user_cache.record_collision();
                    self.store_user(&key, &incoming);
                    return Some(incoming);
                };
                let changed = incoming.merge_inherit_and_diff(&prior);
                if changed {
                    self.store_user(&key, &incoming);
                    Some(incoming)
                } else {
                    None
                }
            }
        }
    }

    pub fn index_medal(&self, incoming: FansMedalMeta) -> Option<FansMedalMeta> {
        let key = incoming.cache_key();
        match self.medal_cache.get(&key) {
            None => {
                self.medal_cache.record_miss();
                self.store_medal(&key, &incoming);
                Some(incoming)
            }
            Some(bytes) => {
                self.medal_cache.record_hit();
                let Ok(prior) = agent_wire::decode::<FansMedalMeta>(&bytes) else {
                    self.medal_cache.record_collision();
                    self.store_medal(&key, &incoming);
                    return Some(incoming);
                };
                let mut incoming = incoming;
                let changed = incoming.merge_inherit_and_diff(&prior);
                if changed {
                    self.store_medal(&key, &incoming);
                    Some(incoming)
                } else {
                    None
                }
            }
        }
    }

    fn store_user(&self, key: &str, user: &UserMeta) {
        if let Ok(bytes) = agent_wire::encode(user) {
            self.user_cache.put(key, bytes);
        }
    }

    fn store_medal(&self, key: &str, medal: &FansMedalMeta) {
        if let Ok(bytes) = agent_wire::encode(medal) {
            self.medal_cache.put(key, bytes);
        }
    }
}

impl Default for MetaIndexer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_wire::GuardLevel;

    fn user(uid: u64, face: Option<&str>) -> UserMeta {
        UserMeta {
            uid,
            username: "bob".to_owned(),
            face: face.map(str::to_owned),
            level: None,
            wealth_level: None,
        }
    }

    #[test]
    fn first_sighting_always_publishes() {
        let indexer = MetaIndexer::new();
        assert!(indexer.index_user(user(1, Some("a.png"))).is_some());
    }

    #[test]
    fn unchanged_repeat_is_suppressed() {
        let indexer = MetaIndexer::new();
        indexer.index_user(user(1, Some("a.png")));
        assert!(indexer.index_user(user(1, None)).is_none());
    }

    #[test]
    fn real_change_republishes() {
        let indexer = MetaIndexer::new();
        indexer.index_user(user(1, Some("a.png")));
        let republished = indexer.index_user(user(1, Some("b.png")));
        assert_eq!(republished.unwrap().face.as_deref(), Some("b.png"));
    }

    #[test]
    fn medal_cache_tracks_by_uid_and_room() {
        let indexer = MetaIndexer::new();
        let medal = FansMedalMeta {
            uid: 1,
            room_uid: 7,
            name: "Fan Club".to_owned(),
            level: 5,
            light: true,
            guard_level: GuardLevel::None,
        };
        assert!(indexer.index_medal(medal.clone()).is_some());
        assert!(indexer.index_medal(medal).is_none());
    }
}
