//! pipeline: the agent's runtime state machine — handshake, room actions,
//! the upstream-frame event loop, and the 1s status ticker (spec §4.4).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_wire::{
    agent_action_subject, agent_info_subject, agent_init_subject, agent_status_subject,
    events::stream_subject, AgentAction, AgentCondition, AgentControlResponse, AgentInfo,
    AgentInit, AgentMask, AgentStatus, MetaCacheStats, StreamEvent,
};
use bus_core::{BusError, BusHelper, InboundMessage};
use metrics_core::MetricsRegistry;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chat_client::{ChatClient, RawFrame};
use crate::config::AgentConfig;
use crate::meta_indexer::MetaIndexer;

/// The mutable runtime state tracked between handshake, action, event-loop,
/// and status-ticker tasks. Split out from [`AppState`] so it's testable
/// without a live bus connection.
#[derive(Default)]
struct Tracking {
    condition: RwLock<AgentCondition>,
    watching: RwLock<HashSet<u64>>,
    event_counters: RwLock<HashMap<String, u64>>,
    buffer_depth: AtomicU64,
}

impl Tracking {
    fn watching_snapshot(&self) -> Vec<u64> {
        let mut rooms: Vec<u64> = self.watching.read().iter().copied().collect();
        rooms.sort_unstable();
        rooms
    }

    fn bump_counter(&self, kind: &str) {
        *self.event_counters.write().entry(kind.to_owned()).or_insert(0) += 1;
    }
}

pub struct AppState {
    pub cfg: AgentConfig,
    pub bus: BusHelper,
    pub chat: Arc<dyn ChatClient>,
    pub indexer: MetaIndexer,
    pub metrics: Arc<MetricsRegistry>,
    tracking: Tracking,
}

impl AppState {
    pub fn new(
        cfg: AgentConfig,
        bus: BusHelper,
        chat: Arc<dyn ChatClient>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            cfg,
            bus,
            chat,
            indexer: MetaIndexer::new(),
            metrics,
            tracking: Tracking::default(),
        }
    }

    fn watching_snapshot(&self) -> Vec<u64> {
        self.tracking.watching_snapshot()
    }

    fn bump_counter(&self, kind: &str) {
        self.tracking.bump_counter(kind);
    }
}

/// Announce on `<prefix>.agent.info` every 3s until `<prefix>.agent.<id>.init`
/// arrives. A fresh `info` clears all condition bits, so this runs again on
/// every restart before the rest of the pipeline starts up.
pub async fn run_handshake(state: &Arc<AppState>) -> Result<(), BusError> {
    *state.tracking.condition.write() = AgentCondition::empty();

    let mut init_rx = state
        .bus
        .subscribe(agent_init_subject(&state.cfg.prefix, &state.cfg.agent_id))
        .await?;
    let mut ticker = tokio::time::interval(Duration::from_secs(3));

    let info = AgentInfo { agent_id: state.cfg.agent_id.clone() };
    let payload = agent_wire::encode(&info).expect("AgentInfo always encodes");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = state.bus.publish(agent_info_subject(&state.cfg.prefix), payload.clone()).await {
                    warn!(error = %e, "failed to announce agent.info");
                }
            }
            Some(msg) = init_rx.recv() => {
                let response = match agent_wire::decode::<AgentInit>(&msg.payload) {
                    Ok(_init) => {
                        state.tracking.condition.write().set(AgentCondition::INITIALIZED);
                        info!(agent_id = %state.cfg.agent_id, "received init, handshake complete");
                        AgentControlResponse::ok()
                    }
                    Err(e) => {
                        warn!(error = %e, "malformed AgentInit payload");
                        AgentControlResponse::error(e.to_string())
                    }
                };
                if let Ok(bytes) = agent_wire::encode(&response) {
                    let _ = msg.respond(bytes).await;
                }
                if response.is_ok() {
                    return Ok(());
                }
            }
        }
    }
}

/// Subscribe to `<prefix>.agent.<id>.action` and dispatch `AddRoom`/`DelRoom`
/// commands until `shutdown` fires.
pub async fn run_action_loop(state: Arc<AppState>, shutdown: CancellationToken) -> Result<(), BusError> {
    let mut rx = state
        .bus
        .subscribe(agent_action_subject(&state.cfg.prefix, &state.cfg.agent_id))
        .await?;

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return Ok(()),
            msg = rx.recv() => {
                let Some(msg) = msg else { return Ok(()) };
                let state = Arc::clone(&state);
                tokio::spawn(async move { handle_action(&state, msg).await });
            }
        }
    }
}

async fn handle_action(state: &Arc<AppState>, msg: InboundMessage) {
    let response = match agent_wire::decode::<AgentAction>(&msg.payload) {
        Ok(AgentAction::AddRoom(room_id)) => match state.chat.join_room(room_id).await {
            Ok(()) => {
                state.tracking.watching.write().insert(room_id);
                state.tracking.condition.write().set(AgentCondition::SYNCED);
                state
                    .metrics
                    .agent_rooms_watched
                    .with_label_values(&[&state.cfg.agent_id])
                    .set(state.tracking.watching.read().len() as i64);
                AgentControlResponse::ok()
            }
            Err(e) => AgentControlResponse::error(e.to_string()),
        },
        Ok(AgentAction::DelRoom(room_id)) => match state.chat.leave_room(room_id).await {
            Ok(()) => {
                state.tracking.watching.write().remove(&room_id);
                state
                    .metrics
                    .agent_rooms_watched
                    .with_label_values(&[&state.cfg.agent_id])
                    .set(state.tracking.watching.read().len() as i64);
                AgentControlResponse::ok()
            }
            Err(e) => AgentControlResponse::error(e.to_string()),
        },
        Err(e) => {
            warn!(error = %e, "malformed AgentAction payload");
            AgentControlResponse::error(e.to_string())
        }
    };

    if let Ok(bytes) = agent_wire::encode(&response) {
        let _ = msg.respond(bytes).await;
    }
    let _ = msg.ack().await;
}

/// Attach `Wait`/`Process` trace steps to a freshly parsed event, in-place
/// across every variant.
fn with_trace(event: StreamEvent, wait_us: i64, process_us: i64) -> StreamEvent {
    fn stamp(
        meta: agent_wire::BasicMsgMeta,
        wait_us: i64,
        process_us: i64,
    ) -> agent_wire::BasicMsgMeta {
        meta.with_trace_step("wait", wait_us).with_trace_step("process", process_us)
    }

    match event {
        StreamEvent::Damaku(mut e) => {
            e.meta = stamp(e.meta, wait_us, process_us);
            StreamEvent::Damaku(e)
        }
        StreamEvent::Gift(mut e) => {
            e.meta = stamp(e.meta, wait_us, process_us);
            StreamEvent::Gift(e)
        }
        StreamEvent::Guard(mut e) => {
            e.meta = stamp(e.meta, wait_us, process_us);
            StreamEvent::Guard(e)
        }
        StreamEvent::SuperChat(mut e) => {
            e.meta = stamp(e.meta, wait_us, process_us);
            StreamEvent::SuperChat(e)
        }
        StreamEvent::OnlineRankCount(mut e) => {
            e.meta = stamp(e.meta, wait_us, process_us);
            StreamEvent::OnlineRankCount(e)
        }
        StreamEvent::OnlineRankV2(mut e) => {
            e.meta = stamp(e.meta, wait_us, process_us);
            StreamEvent::OnlineRankV2(e)
        }
    }
}

async fn publish_meta(state: &AppState, user: Option<agent_wire::UserMeta>, medal: Option<agent_wire::FansMedalMeta>) {
    if let Some(user) = user.and_then(|u| state.indexer.index_user(u)) {
        if let Ok(bytes) = agent_wire::encode(&user) {
            let subject = stream_subject(&state.cfg.prefix, "userInfoMeta");
            if let Err(e) = state.bus.publish(subject, bytes).await {
                warn!(error = %e, "failed to publish userInfoMeta");
            }
        }
    }
    if let Some(medal) = medal.and_then(|m| state.indexer.index_medal(m)) {
        if let Ok(bytes) = agent_wire::encode(&medal) {
            let subject = stream_subject(&state.cfg.prefix, "fansMedal");
            if let Err(e) = state.bus.publish(subject, bytes).await {
                warn!(error = %e, "failed to publish fansMedal");
            }
        }
    }
}

async fn process_frame(state: &Arc<AppState>, frame: RawFrame) {
    let process_start = Instant::now();
    let wait_us = process_start.saturating_duration_since(frame.arrived_at).as_micros() as i64;

    let Some(parsed) = crate::parser::parse(&state.cfg.agent_id, &frame) else {
        return;
    };

    publish_meta(state, parsed.user, parsed.medal).await;

    if let StreamEvent::OnlineRankV2(ref rank) = parsed.event {
        for entry in &rank.online_list {
            if let Some(uid) = entry.uid {
                let user = agent_wire::UserMeta {
                    uid,
                    username: entry.name.clone(),
                    face: entry.face.clone(),
                    level: None,
                    wealth_level: None,
                };
                publish_meta(state, Some(user), None).await;
            }
        }
    }

    let process_us = Instant::now().saturating_duration_since(process_start).as_micros() as i64;
    let kind = parsed.event.kind();
    let event = with_trace(parsed.event, wait_us, process_us);
    state.bump_counter(kind);

    match agent_wire::encode(&event) {
        Ok(bytes) => {
            let subject = stream_subject(&state.cfg.prefix, kind);
            if let Err(e) = state.bus.publish(subject, bytes).await {
                warn!(error = %e, kind, "failed to publish stream event");
            }
        }
        Err(e) => warn!(error = %e, kind, "failed to encode stream event"),
    }
}

/// Drain upstream chat frames until the channel closes or `shutdown` fires.
pub async fn run_event_loop(
    state: Arc<AppState>,
    mut frames: tokio::sync::mpsc::Receiver<RawFrame>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            frame = frames.recv() => {
                let Some(frame) = frame else { return };
                state.tracking.buffer_depth.store(frames.len() as u64, Ordering::Relaxed);
                process_frame(&state, frame).await;
            }
        }
    }
}

/// Broadcast `AgentStatus` every 1s until `shutdown` fires.
///
/// The agent's own mask field is always reported as `AgentMask(0)` —
/// allocation is exclusively owned by the fleet manager, which tracks its
/// own table and never reads this field back.
pub async fn run_status_ticker(state: Arc<AppState>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                state.tracking.condition.write().set(AgentCondition::READY);

                let user_stats = state.indexer.user_cache_stats();
                let medal_stats = state.indexer.medal_cache_stats();
                let status = AgentStatus {
                    agent_id: state.cfg.agent_id.clone(),
                    mask: AgentMask(0),
                    buffer_depth: state.tracking.buffer_depth.load(Ordering::Relaxed),
                    event_counters: state.tracking.event_counters.read().clone(),
                    watching: state.watching_snapshot(),
                    user_meta_stats: MetaCacheStats {
                        hits: user_stats.hits,
                        misses: user_stats.misses,
                        del_hits: user_stats.del_hits,
                        del_misses: user_stats.del_misses,
                        collisions: user_stats.collisions,
                        current_count: user_stats.current_count,
                        channel_depth: 0,
                    },
                    fans_medal_stats: MetaCacheStats {
                        hits: medal_stats.hits,
                        misses: medal_stats.misses,
                        del_hits: medal_stats.del_hits,
                        del_misses: medal_stats.del_misses,
                        collisions: medal_stats.collisions,
                        current_count: medal_stats.current_count,
                        channel_depth: 0,
                    },
                };

                match agent_wire::encode(&status) {
                    Ok(bytes) => {
                        if let Err(e) = state.bus.publish(agent_status_subject(&state.cfg.prefix), bytes).await {
                            warn!(error = %e, "failed to publish agent.status");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode AgentStatus"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watching_snapshot_is_sorted() {
        let tracking = Tracking::default();
        tracking.watching.write().insert(5);
        tracking.watching.write().insert(1);
        tracking.watching.write().insert(3);
        assert_eq!(tracking.watching_snapshot(), vec![1, 3, 5]);
    }

    #[test]
    fn bump_counter_accumulates_per_kind() {
        let tracking = Tracking::default();
        tracking.bump_counter("damaku");
        tracking.bump_counter("damaku");
        tracking.bump_counter("gift");
        let counters = tracking.event_counters.read();
        assert_eq!(counters.get("damaku"), Some(&2));
        assert_eq!(counters.get("gift"), Some(&1));
    }

    #[test]
    fn with_trace_stamps_wait_and_process_steps() {
        let event = StreamEvent::OnlineRankCount(agent_wire::OnlineRankCount {
            meta: agent_wire::BasicMsgMeta::new("agent-1", Some(7), 0),
            count: 1,
            online: 1,
        });
        let stamped = with_trace(event, 100, 50);
        assert_eq!(stamped.meta().trace, vec![("wait".to_owned(), 100), ("process".to_owned(), 50)]);
    }
}
