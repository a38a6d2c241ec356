//! Typed ingestion events, one per supported upstream chat frame kind.
//!
//! Every event is transient: no persistence beyond the bus retention
//! window (spec §3). Each carries its own [`BasicMsgMeta`] envelope.

use serde::{Deserialize, Serialize};

use crate::meta::{BasicMsgMeta, GuardLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FansMedalRef {
    pub room_uid: u64,
    pub name: String,
    pub level: u32,
    pub light: bool,
    pub guard_level: GuardLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Damaku {
    pub meta: BasicMsgMeta,
    pub uid: u64,
    pub username: String,
    pub face: Option<String>,
    pub text: String,
    pub medal: Option<FansMedalRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftInfo {
    pub id: u32,
    pub name: String,
    pub price: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gift {
    pub meta: BasicMsgMeta,
    pub uid: u64,
    pub username: String,
    pub tid: u64,
    pub count: u32,
    pub medal: Option<FansMedalRef>,
    /// The gift actually displayed to the room.
    pub info: GiftInfo,
    /// The un-blinded gift identity. Equal to `info` when the gift was not
    /// a blind-box gift (source: "missing -> original = displayed").
    pub original_info: GiftInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardGiftType {
    Governor,
    Admiral,
    Captain,
    Unknown(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guard {
    pub meta: BasicMsgMeta,
    pub uid: u64,
    pub username: String,
    pub price: u32,
    pub gift_type: GuardGiftType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperChat {
    pub meta: BasicMsgMeta,
    pub id: u64,
    pub uid: u64,
    pub username: String,
    pub face: Option<String>,
    pub message: String,
    pub message_trans: Option<String>,
    pub price: u32,
    pub medal: Option<FansMedalRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineRankCount {
    pub meta: BasicMsgMeta,
    pub count: u32,
    pub online: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineRankEntry {
    pub uid: Option<u64>,
    pub name: String,
    pub face: Option<String>,
    pub score: String,
    pub rank: Option<u32>,
    pub guard_level: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineRankV2 {
    pub meta: BasicMsgMeta,
    pub rank_type: String,
    pub online_list: Vec<OnlineRankEntry>,
}

/// The discriminated union of every typed event, tagged for the stream
/// subject router (`<prefix>.stream.<kind>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    Damaku(Damaku),
    Gift(Gift),
    Guard(Guard),
    SuperChat(SuperChat),
    OnlineRankCount(OnlineRankCount),
    OnlineRankV2(OnlineRankV2),
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Damaku(_) => "damaku",
            StreamEvent::Gift(_) => "gift",
            StreamEvent::Guard(_) => "guard",
            StreamEvent::SuperChat(_) => "superChat",
            StreamEvent::OnlineRankCount(_) => "online",
            StreamEvent::OnlineRankV2(_) => "onlineV2",
        }
    }

    pub fn meta(&self) -> &BasicMsgMeta {
        match self {
            StreamEvent::Damaku(e) => &e.meta,
            StreamEvent::Gift(e) => &e.meta,
            StreamEvent::Guard(e) => &e.meta,
            StreamEvent::SuperChat(e) => &e.meta,
            StreamEvent::OnlineRankCount(e) => &e.meta,
            StreamEvent::OnlineRankV2(e) => &e.meta,
        }
    }

    /// The kind-specific unique key used by the dedup window (§4.6). Events
    /// without a dedup key (online/onlineV2 — master-only streams) return
    /// `None`.
    pub fn dedup_key(&self) -> Option<String> {
        match self {
            StreamEvent::Damaku(e) => Some(format!(
                "damaku:{}:{}:{}",
                e.meta.room_id.unwrap_or(0),
                e.uid,
                e.meta.timestamp_ms
            )),
            StreamEvent::Gift(e) => Some(format!("gift:{}", e.tid)),
            StreamEvent::Guard(e) => Some(format!("guard:{}:{}", e.uid, e.meta.timestamp_ms)),
            StreamEvent::SuperChat(e) => {
                Some(format!("superChat:{}:{}", e.uid, e.meta.timestamp_ms))
            }
            StreamEvent::OnlineRankCount(_) | StreamEvent::OnlineRankV2(_) => None,
        }
    }
}

pub fn stream_subject(prefix: &str, kind: &str) -> String {
    format!("{prefix}.stream.{kind}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> BasicMsgMeta {
        BasicMsgMeta::new("agent-1", Some(7), 1_700_000_000_000)
    }

    #[test]
    fn damaku_dedup_key_matches_room_uid_ts() {
        let event = StreamEvent::Damaku(Damaku {
            meta: meta(),
            uid: 42,
            username: "bob".to_owned(),
            face: None,
            text: "hi".to_owned(),
            medal: None,
        });
        assert_eq!(
            event.dedup_key().unwrap(),
            "damaku:7:42:1700000000000"
        );
    }

    #[test]
    fn gift_dedup_key_is_by_transaction_id() {
        let event = StreamEvent::Gift(Gift {
            meta: meta(),
            uid: 1,
            username: "a".to_owned(),
            tid: 999,
            count: 1,
            medal: None,
            info: GiftInfo { id: 1, name: "rose".to_owned(), price: 100 },
            original_info: GiftInfo { id: 1, name: "rose".to_owned(), price: 100 },
        });
        assert_eq!(event.dedup_key().unwrap(), "gift:999");
    }

    #[test]
    fn online_rank_events_have_no_dedup_key() {
        let event = StreamEvent::OnlineRankCount(OnlineRankCount { meta: meta(), count: 1, online: 1 });
        assert!(event.dedup_key().is_none());
    }
}
