//! Control-plane messages: agent lifecycle announce/init/action/status.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::meta::AgentMask;

/// Broadcast on `<prefix>.agent.info`, repeated every 3s until init arrives,
/// and again on every restart (a fresh `info` clears all condition bits —
/// §4.4/§4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
}

/// Sent once, manager -> agent, on `<prefix>.agent.<id>.init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInit {
    pub cookie: String,
    pub uid: u64,
    pub user_agent: Option<String>,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentControlResponse {
    pub status: ControlStatus,
    pub error: Option<String>,
}

impl AgentControlResponse {
    pub fn ok() -> Self {
        Self { status: ControlStatus::Ok, error: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { status: ControlStatus::Error, error: Some(message.into()) }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, ControlStatus::Ok)
    }
}

/// Room add/remove command, manager -> agent on `<prefix>.agent.<id>.action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentAction {
    AddRoom(u64),
    DelRoom(u64),
}

/// Per-meta-cache counters reported in [`AgentStatus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub del_hits: u64,
    pub del_misses: u64,
    pub collisions: u64,
    pub current_count: u64,
    pub channel_depth: u64,
}

/// Broadcast every 1s on `<prefix>.agent.status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub agent_id: String,
    pub mask: AgentMask,
    pub buffer_depth: u64,
    pub event_counters: HashMap<String, u64>,
    pub watching: Vec<u64>,
    pub user_meta_stats: MetaCacheStats,
    pub fans_medal_stats: MetaCacheStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_response_ok_has_no_error() {
        let resp = AgentControlResponse::ok();
        assert!(resp.is_ok());
        assert!(resp.error.is_none());
    }

    #[test]
    fn control_response_error_carries_message() {
        let resp = AgentControlResponse::error("bad cookie");
        assert!(!resp.is_ok());
        assert_eq!(resp.error.as_deref(), Some("bad cookie"));
    }
}
