//! manager: the three cooperating 1s loops and the message pump that
//! together keep the fleet map converged on the Manager's watched-room set
//! (spec §4.5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_wire::{
    agent_action_subject, agent_info_subject, agent_init_subject, agent_status_subject,
    AgentAction, AgentCondition, AgentControlResponse, AgentInfo, AgentInit, AgentStatus,
};
use bus_core::BusHelper;
use metrics_core::MetricsRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ControllerConfig;
use crate::fleet::Fleet;
use crate::rooms::RoomSet;

pub struct ManagerState {
    pub cfg: ControllerConfig,
    pub bus: BusHelper,
    pub fleet: Arc<Fleet>,
    pub rooms: Arc<RoomSet>,
    pub metrics: Arc<MetricsRegistry>,
}

/// Subscribes to `agent.info` and `agent.status` broadcasts and folds them
/// into the fleet map — the single-consumer "message pump" (spec §4.5).
pub async fn run_message_pump(state: Arc<ManagerState>, shutdown: CancellationToken) {
    let mut info_rx = match state.bus.subscribe(agent_info_subject(&state.cfg.prefix)).await {
        Ok(rx) => rx,
        Err(e) => {
            warn!(error = %e, "failed to subscribe to agent.info");
            return;
        }
    };
    let mut status_rx = match state.bus.subscribe(agent_status_subject(&state.cfg.prefix)).await {
        Ok(rx) => rx,
        Err(e) => {
            warn!(error = %e, "failed to subscribe to agent.status");
            return;
        }
    };

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            msg = info_rx.recv() => {
                let Some(msg) = msg else { return };
                match agent_wire::decode::<AgentInfo>(&msg.payload) {
                    Ok(info) => {
                        debug!(agent_id = %info.agent_id, "agent.info received");
                        state.fleet.register_or_reset(&info.agent_id);
                    }
                    Err(e) => warn!(error = %e, "malformed AgentInfo payload"),
                }
            }
            msg = status_rx.recv() => {
                let Some(msg) = msg else { return };
                match agent_wire::decode::<AgentStatus>(&msg.payload) {
                    Ok(status) => state.fleet.on_status(&status.agent_id, &status),
                    Err(e) => warn!(error = %e, "malformed AgentStatus payload"),
                }
            }
        }
    }
}

/// For each agent lacking INITIALIZED whose last update is ≤3s old, issue a
/// request/reply init with the globally-configured identity.
pub async fn run_init_loop(state: Arc<ManagerState>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let now = Instant::now();
                for (agent_id, condition, last_update, _watching) in state.fleet.snapshot() {
                    if condition.has(AgentCondition::INITIALIZED) {
                        continue;
                    }
                    if now.duration_since(last_update) > Duration::from_secs(3) {
                        continue;
                    }
                    let init = AgentInit {
                        cookie: state.cfg.identity_cookie.clone(),
                        uid: state.cfg.identity_uid,
                        user_agent: state.cfg.identity_user_agent.clone(),
                        headers: HashMap::new(),
                    };
                    let Ok(payload) = agent_wire::encode(&init) else { continue };
                    let subject = agent_init_subject(&state.cfg.prefix, &agent_id);
                    let timeout = Duration::from_secs(state.cfg.control_timeout_s);
                    match state.bus.request(subject, payload, timeout).await {
                        Ok(reply) => match agent_wire::decode::<AgentControlResponse>(&reply) {
                            Ok(resp) if resp.is_ok() => {
                                state.fleet.with_entry(&agent_id, |e| e.condition.set(AgentCondition::INITIALIZED));
                            }
                            Ok(resp) => warn!(agent_id, error = ?resp.error, "init rejected"),
                            Err(e) => warn!(agent_id, error = %e, "malformed init reply"),
                        },
                        Err(e) => debug!(agent_id, error = %e, "init request failed, retrying next tick"),
                    }
                }
            }
        }
    }
}

/// For each READY agent, diff the Manager's watched-room set against the
/// agent's reported watching set and converge it via `AddRoom`/`DelRoom`.
/// Also promotes a master when none exists or the current one lost READY.
pub async fn run_sync_loop(state: Arc<ManagerState>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                state.fleet.promote_master_if_needed();

                let desired: std::collections::HashSet<u64> = state.rooms.watched().into_iter().collect();
                for (agent_id, condition, _last_update, watching) in state.fleet.snapshot() {
                    if !condition.is_ready() {
                        continue;
                    }
                    let current: std::collections::HashSet<u64> = watching.into_iter().collect();
                    let adds: Vec<u64> = desired.difference(&current).copied().collect();
                    let dels: Vec<u64> = current.difference(&desired).copied().collect();
                    if adds.is_empty() && dels.is_empty() {
                        continue;
                    }

                    state.fleet.with_entry(&agent_id, |e| e.condition.clear(AgentCondition::SYNCED));

                    let mut all_ok = true;
                    for room_id in adds.into_iter().chain(dels) {
                        let action = if desired.contains(&room_id) {
                            AgentAction::AddRoom(room_id)
                        } else {
                            AgentAction::DelRoom(room_id)
                        };
                        if !send_action(&state, &agent_id, action).await {
                            all_ok = false;
                        }
                    }

                    if all_ok {
                        state.fleet.with_entry(&agent_id, |e| e.condition.set(AgentCondition::SYNCED));
                    }
                }
            }
        }
    }
}

async fn send_action(state: &ManagerState, agent_id: &str, action: AgentAction) -> bool {
    let Ok(payload) = agent_wire::encode(&action) else { return false };
    let subject = agent_action_subject(&state.cfg.prefix, agent_id);
    let timeout = Duration::from_secs(state.cfg.control_timeout_s);
    match state.bus.request(subject, payload, timeout).await {
        Ok(reply) => match agent_wire::decode::<AgentControlResponse>(&reply) {
            Ok(resp) if resp.is_ok() => true,
            Ok(resp) => {
                warn!(agent_id, ?action, error = ?resp.error, "room action rejected");
                false
            }
            Err(e) => {
                warn!(agent_id, error = %e, "malformed action reply");
                false
            }
        },
        Err(e) => {
            debug!(agent_id, error = %e, "room action request failed");
            false
        }
    }
}

/// Clear READY on any agent whose last update is stale, double-checked
/// under the entry's own write lock.
pub async fn run_status_loop(state: Arc<ManagerState>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let threshold = Duration::from_secs(state.cfg.status_stale_s);
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                for agent_id in state.fleet.status_stale_ids(threshold) {
                    state.fleet.with_entry(&agent_id, |e| {
                        if e.condition.has(AgentCondition::READY)
                            && Instant::now().duration_since(e.last_update) > threshold
                        {
                            e.condition.clear(AgentCondition::READY);
                        }
                    });
                }
                let active_ids: Vec<String> = state.fleet.snapshot().into_iter().map(|(id, ..)| id).collect();
                state.metrics.reap_room_labels(&active_ids);
            }
        }
    }
}
