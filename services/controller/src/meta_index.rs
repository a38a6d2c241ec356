//! meta_index: the controller's own user/fans-medal identity caches,
//! running the same diff/merge-inherit logic as the agent's meta indexer
//! (spec §4.6) but over everything the whole fleet reports.

use std::time::Duration;

use agent_wire::{FansMedalMeta, UserMeta};
use ttl_cache::TtlCache;

pub struct MetaIndex {
    user_cache: std::sync::Arc<TtlCache>,
    medal_cache: std::sync::Arc<TtlCache>,
}

impl MetaIndex {
    pub fn new(ttl: Duration) -> Self {
        Self {
            user_cache: TtlCache::new(1024, ttl),
            medal_cache: TtlCache::new(1024, ttl),
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

    pub fn index_user(&self, mut incoming: UserMeta) -> Option<UserMeta> {
        let key = incoming.cache_key();
        match self.user_cache.get(&key) {
            None => {
                self.user_cache.record_miss();
                self.put_user(&key, &incoming);
                Some(incoming)
            }
            Some(bytes) => {
                self.user_cache.record_hit();
                let Ok(prior) = agent_wire::decode::<UserMeta>(&bytes) else {
                    self.user_cache.record_collision();
                    self.put_user(&key, &incoming);
                    return Some(incoming);
                };
                if incoming.merge_inherit_and_diff(&prior) {
                    self.put_user(&key, &incoming);
                    Some(incoming)
                } else {
                    None
                }
            }
        }
    }

    pub fn index_medal(&self, mut incoming: FansMedalMeta) -> Option<FansMedalMeta> {
        let key = incoming.cache_key();
        match self.medal_cache.get(&key) {
            None => {
                self.medal_cache.record_miss();
                self.put_medal(&key, &incoming);
                Some(incoming)
            }
            Some(bytes) => {
                self.medal_cache.record_hit();
                let Ok(prior) = agent_wire::decode::<FansMedalMeta>(&bytes) else {
                    self.medal_cache.record_collision();
                    self.put_medal(&key, &incoming);
                    return Some(incoming);
                };
                if incoming.merge_inherit_and_diff(&prior) {
                    self.put_medal(&key, &incoming);
                    Some(incoming)
                } else {
                    None
                }
            }
        }
    }

    fn put_user(&self, key: &str, user: &UserMeta) {
        if let Ok(bytes) = agent_wire::encode(user) {
            self.user_cache.put(key, bytes);
        }
    }

    fn put_medal(&self, key: &str, medal: &FansMedalMeta) {
        if let Ok(bytes) = agent_wire::encode(medal) {
            self.medal_cache.put(key, bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_wire::GuardLevel;

    #[test]
    fn unchanged_medal_repeat_is_suppressed() {
        let index = MetaIndex::new(Duration::from_secs(60));
        let medal = FansMedalMeta {
            uid: 1,
            room_uid: 7,
            name: "Fan Club".to_owned(),
            level: 5,
            light: true,
            guard_level: GuardLevel::None,
        };
        assert!(index.index_medal(medal.clone()).is_some());
        assert!(index.index_medal(medal).is_none());
    }
}
