//! fleet: the concurrent `agent_id -> Agent` map plus mask allocation and
//! master election (spec §4.5).
//!
//! Each agent's mutable fields live behind their own lock so the three
//! cooperating loops (init/sync/status) never contend on a single
//! fleet-wide lock while they iterate — only the top-level map lock is
//! ever held briefly, to look up or insert an `Arc<RwLock<AgentEntry>>>`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_wire::{AgentCondition, AgentMask, AgentStatus};
use parking_lot::RwLock;
use tracing::warn;

pub struct AgentEntry {
    pub mask: AgentMask,
    pub condition: AgentCondition,
    pub last_update: Instant,
    pub watching: Vec<u64>,
    pub hit_status: HashMap<String, u64>,
}

pub struct Fleet {
    agents: RwLock<HashMap<String, Arc<RwLock<AgentEntry>>>>,
    mask_index: RwLock<HashMap<u16, String>>,
    next_mask: RwLock<u16>,
    master: RwLock<Option<String>>,
}

impl Fleet {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            mask_index: RwLock::new(HashMap::new()),
            next_mask: RwLock::new(0),
            master: RwLock::new(None),
        }
    }

    fn allocate_mask(&self) -> AgentMask {
        let mut next = self.next_mask.write();
        let mask = AgentMask(*next);
        *next = next.wrapping_add(1);
        mask
    }

    /// An `info` frame arrived: auto-register a fresh agent (allocating the
    /// next mask) or, for a known agent, clear all condition bits — it
    /// restarted.
    pub fn register_or_reset(&self, agent_id: &str) {
        let existing = self.agents.read().get(agent_id).cloned();
        match existing {
            Some(entry) => {
                let mut entry = entry.write();
                entry.condition = AgentCondition::empty();
                entry.watching.clear();
                entry.last_update = Instant::now();
            }
            None => {
                let mask = self.allocate_mask();
                self.mask_index.write().insert(mask.0, agent_id.to_owned());
                self.agents.write().insert(
                    agent_id.to_owned(),
                    Arc::new(RwLock::new(AgentEntry {
                        mask,
                        condition: AgentCondition::empty(),
                        last_update: Instant::now(),
                        watching: Vec::new(),
                        hit_status: HashMap::new(),
                    })),
                );
            }
        }
    }

    /// A `status` frame arrived: replace the cached snapshot, set
    /// INITIALIZED | READY, bump the update time. Unknown agents are
    /// dropped with a warning — a status frame implies a prior `info`.
    pub fn on_status(&self, agent_id: &str, status: &AgentStatus) {
        let Some(entry) = self.agents.read().get(agent_id).cloned() else {
            warn!(agent_id, "status frame from unregistered agent, dropping");
            return;
        };
        let mut entry = entry.write();
        entry.condition.set(AgentCondition::INITIALIZED);
        entry.condition.set(AgentCondition::READY);
        entry.watching = status.watching.clone();
        entry.last_update = Instant::now();
    }

    pub fn mask_for(&self, agent_id: &str) -> Option<AgentMask> {
        self.agents.read().get(agent_id).map(|e| e.read().mask)
    }

    pub fn agent_id_for_mask(&self, mask: u16) -> Option<String> {
        self.mask_index.read().get(&mask).cloned()
    }

    /// Splits `masks` into 2-byte units and increments each matching
    /// agent's `hit_status[category]` counter. Unknown masks are skipped.
    pub fn add_agent_hit_mask(&self, masks: &[AgentMask], category: &str) {
        for mask in masks {
            let Some(agent_id) = self.agent_id_for_mask(mask.0) else { continue };
            if let Some(entry) = self.agents.read().get(&agent_id).cloned() {
                *entry.write().hit_status.entry(category.to_owned()).or_insert(0) += 1;
            }
        }
    }

    /// Snapshot of every agent id and its condition/last-update/watching,
    /// for the init/sync/status loops to iterate without holding any lock
    /// across an await point.
    pub fn snapshot(&self) -> Vec<(String, AgentCondition, Instant, Vec<u64>)> {
        self.agents
            .read()
            .iter()
            .map(|(id, entry)| {
                let e = entry.read();
                (id.clone(), e.condition, e.last_update, e.watching.clone())
            })
            .collect()
    }

    /// Mutate a single agent's entry under its own lock. Returns `None` if
    /// the agent has since been evicted.
    pub fn with_entry<R>(&self, agent_id: &str, f: impl FnOnce(&mut AgentEntry) -> R) -> Option<R> {
        let entry = self.agents.read().get(agent_id).cloned()?;
        Some(f(&mut entry.write()))
    }

    /// The corrected `MasterAgent()`: return the elected master's id when
    /// one is set, else `None` — never the reverse (spec §9).
    pub fn master(&self) -> Option<String> {
        self.master.read().clone()
    }

    /// Promote a READY agent to master when none exists or the current
    /// master has lost READY. Picks the lexicographically-lowest READY
    /// agent id for a deterministic, restart-stable choice.
    pub fn promote_master_if_needed(&self) {
        let current_is_ready = self
            .master
            .read()
            .as_ref()
            .and_then(|id| self.agents.read().get(id).cloned())
            .is_some_and(|e| e.read().condition.is_ready());
        if current_is_ready {
            return;
        }

        let mut ready_ids: Vec<String> = self
            .agents
            .read()
            .iter()
            .filter(|(_, e)| e.read().condition.is_ready())
            .map(|(id, _)| id.clone())
            .collect();
        ready_ids.sort();
        *self.master.write() = ready_ids.into_iter().next();
    }

    pub fn status_stale_ids(&self, threshold: Duration) -> Vec<String> {
        let now = Instant::now();
        self.agents
            .read()
            .iter()
            .filter(|(_, e)| {
                let e = e.read();
                e.condition.has(AgentCondition::READY) && now.duration_since(e.last_update) > threshold
            })
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl Default for Fleet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_allocates_monotonic_masks() {
        let fleet = Fleet::new();
        fleet.register_or_reset("a");
        fleet.register_or_reset("b");
        assert_eq!(fleet.mask_for("a"), Some(AgentMask(0)));
        assert_eq!(fleet.mask_for("b"), Some(AgentMask(1)));
    }

    #[test]
    fn restart_clears_condition_and_watching() {
        let fleet = Fleet::new();
        fleet.register_or_reset("a");
        fleet.with_entry("a", |e| {
            e.condition.set(AgentCondition::INITIALIZED);
            e.condition.set(AgentCondition::READY);
            e.watching = vec![1, 2, 3];
        });
        fleet.register_or_reset("a");
        let snapshot = fleet.snapshot();
        let (_, condition, _, watching) = snapshot.iter().find(|(id, ..)| id == "a").unwrap();
        assert_eq!(*condition, AgentCondition::empty());
        assert!(watching.is_empty());
        // Re-registering a known agent must not allocate a new mask.
        assert_eq!(fleet.mask_for("a"), Some(AgentMask(0)));
    }

    #[test]
    fn master_returns_none_until_promoted() {
        let fleet = Fleet::new();
        assert_eq!(fleet.master(), None);
        fleet.register_or_reset("a");
        fleet.promote_master_if_needed();
        assert_eq!(fleet.master(), None, "not READY yet");

        fleet.with_entry("a", |e| {
            e.condition.set(AgentCondition::INITIALIZED);
            e.condition.set(AgentCondition::READY);
        });
        fleet.promote_master_if_needed();
        assert_eq!(fleet.master(), Some("a".to_owned()));
    }

    #[test]
    fn master_reelects_when_current_loses_ready() {
        let fleet = Fleet::new();
        fleet.register_or_reset("a");
        fleet.register_or_reset("b");
        for id in ["a", "b"] {
            fleet.with_entry(id, |e| {
                e.condition.set(AgentCondition::INITIALIZED);
                e.condition.set(AgentCondition::READY);
            });
        }
        fleet.promote_master_if_needed();
        assert_eq!(fleet.master(), Some("a".to_owned()));

        fleet.with_entry("a", |e| e.condition.clear(AgentCondition::READY));
        fleet.promote_master_if_needed();
        assert_eq!(fleet.master(), Some("b".to_owned()));
    }

    #[test]
    fn add_agent_hit_mask_credits_known_agents_only() {
        let fleet = Fleet::new();
        fleet.register_or_reset("a");
        fleet.add_agent_hit_mask(&[AgentMask(0), AgentMask(999)], "damaku");
        let hits = fleet.with_entry("a", |e| e.hit_status.get("damaku").copied()).unwrap();
        assert_eq!(hits, Some(1));
    }
}
