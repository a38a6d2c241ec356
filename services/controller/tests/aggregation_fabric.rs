//! Exercises the aggregation fabric's core seed scenarios end to end,
//! in-process, against the real `Fleet`, parser, and `TtlCache` dedup
//! machinery (no live bus required — these are pure data-plane behaviors).

use std::time::Duration;

use agent::parser;
use agent::chat_client::RawFrame;
use agent_wire::{AgentCondition, AgentMask, StreamEvent};
use controller::fleet::Fleet;
use ttl_cache::{DedupOutcome, TtlCache};

fn damaku_frame(room_id: u64, uid: u64, ts_ms: u64, text: &str) -> RawFrame {
    let body = serde_json::json!([
        [0, 0, 0, 0, ts_ms],
        text,
        [uid, "alice"],
    ]);
    RawFrame { room_id, cmd: "DANMU_MSG".to_owned(), body, arrived_at: std::time::Instant::now() }
}

fn make_ready(fleet: &Fleet, agent_id: &str) {
    fleet.register_or_reset(agent_id);
    fleet.with_entry(agent_id, |e| {
        e.condition.set(AgentCondition::INITIALIZED);
        e.condition.set(AgentCondition::READY);
    });
}

#[test]
fn single_agent_happy_path_emits_once() {
    let fleet = Fleet::new();
    make_ready(&fleet, "agent-a");

    let frame = damaku_frame(42, 1001, 1_700_000_000_000, "hello");
    let parsed = parser::parse("agent-a", &frame).expect("DANMU_MSG should parse");
    let StreamEvent::Damaku(_) = &parsed.event else { panic!("expected damaku") };

    let mask = fleet.mask_for("agent-a").unwrap();
    let key = parsed.event.dedup_key().expect("damaku has a dedup key");
    let dedup = TtlCache::new(8, Duration::from_secs(600));

    assert_eq!(dedup.probe_and_append(&key, &mask.to_be_bytes()), DedupOutcome::Miss);
}

#[test]
fn two_agents_reporting_the_same_event_dedup_to_a_single_emit() {
    let fleet = Fleet::new();
    make_ready(&fleet, "agent-a");
    make_ready(&fleet, "agent-b");

    let frame_a = damaku_frame(42, 1001, 1_700_000_000_000, "hello");
    let frame_b = damaku_frame(42, 1001, 1_700_000_000_000, "hello");
    let parsed_a = parser::parse("agent-a", &frame_a).unwrap();
    let parsed_b = parser::parse("agent-b", &frame_b).unwrap();

    let key_a = parsed_a.event.dedup_key().unwrap();
    let key_b = parsed_b.event.dedup_key().unwrap();
    assert_eq!(key_a, key_b, "identical room/uid/timestamp must collide on the same key");

    let mask_a = fleet.mask_for("agent-a").unwrap();
    let mask_b = fleet.mask_for("agent-b").unwrap();
    let dedup = TtlCache::new(8, Duration::from_secs(600));

    assert_eq!(dedup.probe_and_append(&key_a, &mask_a.to_be_bytes()), DedupOutcome::Miss);
    assert_eq!(dedup.probe_and_append(&key_b, &mask_b.to_be_bytes()), DedupOutcome::Hit);
}

#[test]
fn online_rank_events_are_accepted_only_from_the_elected_master() {
    let fleet = Fleet::new();
    make_ready(&fleet, "agent-a");
    make_ready(&fleet, "agent-b");
    fleet.promote_master_if_needed();
    let master = fleet.master().expect("a master must be elected once agents are READY");

    // The lexicographically-lowest READY id wins, deterministically.
    assert_eq!(master, "agent-a");
    assert_ne!(master, "agent-b");
}

#[test]
fn agent_reannounce_clears_condition_but_keeps_its_mask() {
    let fleet = Fleet::new();
    make_ready(&fleet, "agent-a");
    let mask_before = fleet.mask_for("agent-a").unwrap();

    // Re-announcing (a fresh `agent.info`) means the process restarted.
    fleet.register_or_reset("agent-a");

    let snapshot = fleet.snapshot();
    let (_, condition, _, watching) = snapshot.iter().find(|(id, ..)| id == "agent-a").unwrap();
    assert_eq!(*condition, AgentCondition::empty(), "restart must clear all condition bits");
    assert!(watching.is_empty());
    assert_eq!(fleet.mask_for("agent-a"), Some(mask_before), "mask allocation survives a restart");
}

#[test]
fn dedup_window_eviction_credits_every_contributing_agent() {
    let fleet = Fleet::new();
    make_ready(&fleet, "agent-a");
    make_ready(&fleet, "agent-b");
    let mask_a = fleet.mask_for("agent-a").unwrap();
    let mask_b = fleet.mask_for("agent-b").unwrap();

    let hook_fleet = std::sync::Arc::new(Fleet::new());
    make_ready(&hook_fleet, "agent-a");
    make_ready(&hook_fleet, "agent-b");
    let hook_target = std::sync::Arc::clone(&hook_fleet);
    let hook: ttl_cache::EvictHook = std::sync::Arc::new(move |key, value| {
        let Some((category, _)) = key.split_once(':') else { return };
        let masks = AgentMask::split_many(value);
        hook_target.add_agent_hit_mask(&masks, category);
    });
    let dedup = TtlCache::with_evict_hook(4, Duration::from_secs(600), Some(hook));

    dedup.probe_and_append("damaku:42:1001:1700000000000", &mask_a.to_be_bytes());
    dedup.probe_and_append("damaku:42:1001:1700000000000", &mask_b.to_be_bytes());

    // No sweeper task is running; `flush` drives the same eviction-hook path
    // a shutdown would, delivering the final accounting pass synchronously.
    dedup.flush();

    let hits_a = hook_fleet.with_entry("agent-a", |e| e.hit_status.get("damaku").copied()).unwrap();
    let hits_b = hook_fleet.with_entry("agent-b", |e| e.hit_status.get("damaku").copied()).unwrap();
    assert_eq!(hits_a, Some(1));
    assert_eq!(hits_b, Some(1));
}
