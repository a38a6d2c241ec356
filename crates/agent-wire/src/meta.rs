//! Shared envelope and side-channel identity records.

use serde::{Deserialize, Serialize};

/// A 2-byte, big-endian, monotonically-assigned agent identifier. Used as
/// the unit of contribution accounting in dedup cache values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentMask(pub u16);

impl AgentMask {
    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 2]) -> Self {
        AgentMask(u16::from_be_bytes(bytes))
    }

    /// Split a concatenated run of 2-byte masks. `len % 2 != 0` is logged by
    /// the caller (spec §4.5) and the trailing odd byte is dropped here.
    pub fn split_many(bytes: &[u8]) -> Vec<AgentMask> {
        bytes
            .chunks_exact(2)
            .map(|chunk| AgentMask::from_be_bytes([chunk[0], chunk[1]]))
            .collect()
    }

    pub fn concat(masks: &[AgentMask]) -> Vec<u8> {
        let mut out = Vec::with_capacity(masks.len() * 2);
        for mask in masks {
            out.extend_from_slice(&mask.to_be_bytes());
        }
        out
    }
}

/// Per-event envelope carried alongside every typed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicMsgMeta {
    pub version: u32,
    pub agent_id: String,
    pub room_id: Option<u64>,
    pub timestamp_ms: u64,
    /// Step name -> elapsed microseconds, e.g. `("wait", 842)`, `("process", 113)`.
    pub trace: Vec<(String, i64)>,
}

impl BasicMsgMeta {
    pub fn new(agent_id: impl Into<String>, room_id: Option<u64>, timestamp_ms: u64) -> Self {
        Self {
            version: 1,
            agent_id: agent_id.into(),
            room_id,
            timestamp_ms,
            trace: Vec::new(),
        }
    }

    pub fn with_trace_step(mut self, step: impl Into<String>, micros: i64) -> Self {
        self.trace.push((step.into(), micros));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardLevel {
    None,
    Governor,
    Admiral,
    Captain,
}

impl GuardLevel {
    pub fn from_raw(v: u64) -> Self {
        match v {
            1 => GuardLevel::Governor,
            2 => GuardLevel::Admiral,
            3 => GuardLevel::Captain,
            _ => GuardLevel::None,
        }
    }
}

/// Identity attributes extracted from events, keyed by `uid`.
///
/// Diffed against the meta cache on receipt (§4.4/§4.6): a later record
/// missing an optional field inherits it from the cached record before the
/// comparison, so a partial update never looks like a spurious change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMeta {
    pub uid: u64,
    pub username: String,
    pub face: Option<String>,
    pub level: Option<u32>,
    pub wealth_level: Option<u32>,
}

impl UserMeta {
    pub fn cache_key(&self) -> String {
        self.uid.to_string()
    }

    /// Fill any `None` optional field on `self` from `prior`, then return
    /// whether the merged record differs from `prior` in any carried field.
    pub fn merge_inherit_and_diff(&mut self, prior: &UserMeta) -> bool {
        if self.face.is_none() {
            self.face = prior.face.clone();
        }
        if self.level.is_none() {
            self.level = prior.level;
        }
        if self.wealth_level.is_none() {
            self.wealth_level = prior.wealth_level;
        }
        self != prior
    }
}

/// Fans-medal identity attributes, keyed by `uid:room_uid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FansMedalMeta {
    pub uid: u64,
    pub room_uid: u64,
    pub name: String,
    pub level: u32,
    pub light: bool,
    pub guard_level: GuardLevel,
}

impl FansMedalMeta {
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.uid, self.room_uid)
    }

    pub fn merge_inherit_and_diff(&mut self, prior: &FansMedalMeta) -> bool {
        // All fields on FansMedalMeta are required in the source protocol;
        // nothing to inherit, but the diff still suppresses unchanged
        // republishes per §4.4/§4.6.
        self != prior
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_concat_and_split_round_trip() {
        let masks = vec![AgentMask(1), AgentMask(2), AgentMask(65535)];
        let bytes = AgentMask::concat(&masks);
        assert_eq!(bytes.len(), 6);
        let parsed = AgentMask::split_many(&bytes);
        assert_eq!(parsed, masks);
    }

    #[test]
    fn user_meta_inherits_missing_optional_fields_before_diffing() {
        let prior = UserMeta {
            uid: 1,
            username: "alice".to_owned(),
            face: Some("face.png".to_owned()),
            level: Some(10),
            wealth_level: None,
        };
        let mut incoming = UserMeta {
            uid: 1,
            username: "alice".to_owned(),
            face: None,
            level: Some(10),
            wealth_level: None,
        };
        let changed = incoming.merge_inherit_and_diff(&prior);
        assert!(!changed, "inherited face should make this a no-op diff");
        assert_eq!(incoming.face, prior.face);
    }

    #[test]
    fn user_meta_detects_real_changes_after_inheriting() {
        let prior = UserMeta {
            uid: 1,
            username: "alice".to_owned(),
            face: Some("old.png".to_owned()),
            level: Some(10),
            wealth_level: None,
        };
        let mut incoming = UserMeta {
            uid: 1,
            username: "alice".to_owned(),
            face: None,
            level: Some(11),
            wealth_level: None,
        };
        let changed = incoming.merge_inherit_and_diff(&prior);
        assert!(changed);
        assert_eq!(incoming.face, prior.face);
        assert_eq!(incoming.level, Some(11));
    }
}
