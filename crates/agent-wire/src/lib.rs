//! agent-wire: wire types for the live-message aggregation plane.

pub mod condition;
pub mod control;
pub mod events;
pub mod meta;

pub use condition::AgentCondition;
pub use control::{AgentAction, AgentControlResponse, AgentInfo, AgentInit, AgentStatus, ControlStatus, MetaCacheStats};
pub use events::{Damaku, FansMedalRef, Gift, GiftInfo, Guard, GuardGiftType, OnlineRankCount, OnlineRankEntry, OnlineRankV2, StreamEvent, SuperChat};
pub use meta::{AgentMask, BasicMsgMeta, FansMedalMeta, GuardLevel, UserMeta};

pub fn agent_info_subject(prefix: &str) -> String {
    format!("{prefix}.agent.info")
}

pub fn agent_init_subject(prefix: &str, agent_id: &str) -> String {
    format!("{prefix}.agent.{agent_id}.init")
}

pub fn agent_action_subject(prefix: &str, agent_id: &str) -> String {
    format!("{prefix}.agent.{agent_id}.action")
}

pub fn agent_status_subject(prefix: &str) -> String {
    format!("{prefix}.agent.status")
}

/// Encode a message for the binary bus wire format (spec §6: length-delimited
/// tagged binary messages, additive evolution via serde-derived enums).
pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(value)
}

pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(bytes)
}
