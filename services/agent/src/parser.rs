//! parser: turns a raw decoded upstream frame into a typed event plus the
//! side-channel identity records extracted alongside it.
//!
//! Field paths are grounded directly on
//! `io-bilive-damaku/agent/parse/rawJsonParser.go`'s `gjson`-style
//! extraction — same paths, same fallbacks, translated from `gjson.Get`
//! chains to plain `serde_json::Value` indexing.

use agent_wire::{
    BasicMsgMeta, Damaku, FansMedalMeta, FansMedalRef, Gift, GiftInfo, Guard, GuardGiftType,
    GuardLevel, OnlineRankCount, OnlineRankEntry, OnlineRankV2, StreamEvent, SuperChat, UserMeta,
};
use serde_json::Value;

use crate::chat_client::RawFrame;

/// A typed event plus whatever identity records were extracted alongside
/// it, destined for the meta indexer's two channels.
pub struct Parsed {
    pub event: StreamEvent,
    pub user: Option<UserMeta>,
    pub medal: Option<FansMedalMeta>,
}

fn get<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut cur = value;
    for part in path.split('.') {
        cur = match cur {
            Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
            Value::Object(map) => map.get(part)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn get_u64(value: &Value, path: &str) -> Option<u64> {
    get(value, path).and_then(Value::as_u64)
}

fn get_str(value: &Value, path: &str) -> Option<String> {
    get(value, path).and_then(Value::as_str).map(str::to_owned)
}

fn get_bool(value: &Value, path: &str) -> Option<bool> {
    get(value, path).and_then(Value::as_bool)
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

/// Parse a `DANMU_MSG` frame.
pub fn parse_damaku(agent_id: &str, room_id: u64, body: &Value) -> Parsed {
    let timestamp_ms = get_u64(body, "0.4").unwrap_or(0);
    let uid = get_u64(body, "2.0").unwrap_or(0);
    let username = get_str(body, "2.1").unwrap_or_default();
    let face = non_empty(get_str(body, "0.15.user.base.face"));
    let text = get_str(body, "1").unwrap_or_default();

    let medal_room_uid = get_u64(body, "3.12").unwrap_or(0);
    let (medal_ref, medal_meta) = if medal_room_uid > 0 {
        let name = get_str(body, "3.1").unwrap_or_default();
        let level = get_u64(body, "3.0").unwrap_or(0) as u32;
        let light = get_bool(body, "3.11").unwrap_or(false);
        let guard_level = GuardLevel::from_raw(get_u64(body, "3.10").unwrap_or(0));
        (
            Some(FansMedalRef { room_uid: medal_room_uid, name: name.clone(), level, light, guard_level }),
            Some(FansMedalMeta { uid, room_uid: medal_room_uid, name, level, light, guard_level }),
        )
    } else {
        (None, None)
    };

    let event = StreamEvent::Damaku(Damaku {
        meta: BasicMsgMeta::new(agent_id, Some(room_id), timestamp_ms),
        uid,
        username: username.clone(),
        face: face.clone(),
        text,
        medal: medal_ref,
    });

    Parsed {
        event,
        user: Some(UserMeta { uid, username, face, level: None, wealth_level: None }),
        medal: medal_meta,
    }
}

/// Parse a `SEND_GIFT` frame. Blind-gift swap: when `blind_gift` is present
/// the displayed info (`info`) differs from the un-blinded original
/// (`original_info`); absent, `original_info == info`.
pub fn parse_gift(agent_id: &str, room_id: u64, body: &Value) -> Parsed {
    let timestamp_ms = get_u64(body, "timestamp").unwrap_or(0) * 1000;
    let uid = get_u64(body, "uid").unwrap_or(0);
    let username = get_str(body, "uname").unwrap_or_default();
    let face = non_empty(get_str(body, "face"));
    let wealth_level = get_u64(body, "wealth_level").filter(|w| *w != 0).map(|w| w as u32);

    let medal_room_uid = get_u64(body, "medal_info.target_id").unwrap_or(0);
    let medal_meta = if get(body, "medal_info").is_some() {
        Some(FansMedalMeta {
            uid,
            room_uid: medal_room_uid,
            name: get_str(body, "medal_info.medal_name").unwrap_or_default(),
            level: get_u64(body, "medal_info.medal_level").unwrap_or(0) as u32,
            light: get_bool(body, "medal_info.is_lighted").unwrap_or(false),
            guard_level: GuardLevel::from_raw(get_u64(body, "medal_info.guard_level").unwrap_or(0)),
        })
    } else {
        None
    };
    let medal_ref = medal_meta.as_ref().map(|m| FansMedalRef {
        room_uid: m.room_uid,
        name: m.name.clone(),
        level: m.level,
        light: m.light,
        guard_level: m.guard_level,
    });

    let info = GiftInfo {
        id: get_u64(body, "giftId").unwrap_or(0) as u32,
        name: get_str(body, "giftName").unwrap_or_default(),
        price: get_u64(body, "price").unwrap_or(0) as u32,
    };
    let original_info = if get(body, "blind_gift").is_some() {
        GiftInfo {
            id: get_u64(body, "blind_gift.original_gift_id").unwrap_or(0) as u32,
            name: get_str(body, "blind_gift.original_gift_name").unwrap_or_default(),
            price: get_u64(body, "blind_gift.original_gift_price").unwrap_or(0) as u32,
        }
    } else {
        info.clone()
    };

    let event = StreamEvent::Gift(Gift {
        meta: BasicMsgMeta::new(agent_id, Some(room_id), timestamp_ms),
        uid,
        username: username.clone(),
        tid: get_u64(body, "tid").unwrap_or(0),
        count: get_u64(body, "num").unwrap_or(0) as u32,
        medal: medal_ref,
        info,
        original_info,
    });

    Parsed {
        event,
        user: Some(UserMeta { uid, username, face, level: None, wealth_level }),
        medal: medal_meta,
    }
}

/// Parse a `GUARD_BUY` frame.
pub fn parse_guard(agent_id: &str, room_id: u64, body: &Value) -> Parsed {
    let timestamp_ms = get_u64(body, "start_time").unwrap_or(0) * 1000;
    let uid = get_u64(body, "uid").unwrap_or(0);
    let username = get_str(body, "username").unwrap_or_default();
    let price = get_u64(body, "price").unwrap_or(0) as u32;
    let gift_type = match get_u64(body, "gift_id").unwrap_or(0) {
        1 => GuardGiftType::Governor,
        2 => GuardGiftType::Admiral,
        3 => GuardGiftType::Captain,
        other => GuardGiftType::Unknown(other as u32),
    };

    let event = StreamEvent::Guard(Guard {
        meta: BasicMsgMeta::new(agent_id, Some(room_id), timestamp_ms),
        uid,
        username: username.clone(),
        price,
        gift_type,
    });

    Parsed {
        event,
        user: Some(UserMeta { uid, username, face: None, level: None, wealth_level: None }),
        medal: None,
    }
}

/// Parse a `SUPER_CHAT_MESSAGE` frame. Nested medal colors occasionally
/// decode oddly upstream (int vs hex string depending on API version); we
/// never read that field, so the mismatch never surfaces here.
pub fn parse_super_chat(agent_id: &str, room_id: u64, body: &Value) -> Parsed {
    let timestamp_ms = get_u64(body, "ts").unwrap_or(0);
    let uid = get_u64(body, "uid").unwrap_or(0);
    let username = get_str(body, "uinfo.base.name").unwrap_or_default();
    let face = non_empty(get_str(body, "uinfo.base.face"));
    let level = get_u64(body, "user_info.user_level").map(|l| l as u32);

    let medal_room_uid = get_u64(body, "uinfo.medal.ruid").unwrap_or(0);
    let medal_meta = if get(body, "uinfo.medal").is_some() {
        Some(FansMedalMeta {
            uid,
            room_uid: medal_room_uid,
            name: get_str(body, "uinfo.medal.name").unwrap_or_default(),
            level: get_u64(body, "uinfo.medal.level").unwrap_or(0) as u32,
            light: get_bool(body, "uinfo.medal.is_light").unwrap_or(false),
            guard_level: GuardLevel::from_raw(get_u64(body, "uinfo.medal.guard_level").unwrap_or(0)),
        })
    } else {
        None
    };
    let medal_ref = medal_meta.as_ref().map(|m| FansMedalRef {
        room_uid: m.room_uid,
        name: m.name.clone(),
        level: m.level,
        light: m.light,
        guard_level: m.guard_level,
    });

    let event = StreamEvent::SuperChat(SuperChat {
        meta: BasicMsgMeta::new(agent_id, Some(room_id), timestamp_ms),
        id: get_u64(body, "id").unwrap_or(0),
        uid,
        username: username.clone(),
        face: face.clone(),
        message: get_str(body, "message").unwrap_or_default(),
        message_trans: get_str(body, "message_trans"),
        price: get_u64(body, "price").unwrap_or(0) as u32,
        medal: medal_ref,
    });

    Parsed {
        event,
        user: Some(UserMeta { uid, username, face, level, wealth_level: None }),
        medal: medal_meta,
    }
}

/// Parse an `ONLINE_RANK_COUNT` frame. No identity side-channel — this
/// stream reports aggregate counts, not per-user attributes.
pub fn parse_online_rank_count(agent_id: &str, room_id: u64, body: &Value) -> Parsed {
    let event = StreamEvent::OnlineRankCount(OnlineRankCount {
        meta: BasicMsgMeta::new(agent_id, Some(room_id), 0),
        count: get_u64(body, "count").unwrap_or(0) as u32,
        online: get_u64(body, "online_count").unwrap_or(0) as u32,
    });
    Parsed { event, user: None, medal: None }
}

/// Parse an `ONLINE_RANK_V2` frame. Each ranked entry spawns its own
/// `UserMeta` update, handled by the caller iterating `online_list`.
pub fn parse_online_rank_v2(agent_id: &str, room_id: u64, body: &Value) -> Parsed {
    let rank_type = get_str(body, "rank_type").unwrap_or_default();
    let online_list: Vec<OnlineRankEntry> = get(body, "list")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|entry| OnlineRankEntry {
                    uid: get_u64(entry, "uid"),
                    name: get_str(entry, "uname").unwrap_or_default(),
                    face: non_empty(get_str(entry, "face")),
                    score: get_str(entry, "score").unwrap_or_default(),
                    rank: get_u64(entry, "rank").map(|r| r as u32),
                    guard_level: get_u64(entry, "guard_level").map(|g| g as u32),
                })
                .collect()
        })
        .unwrap_or_default();

    let event = StreamEvent::OnlineRankV2(OnlineRankV2 {
        meta: BasicMsgMeta::new(agent_id, Some(room_id), 0),
        rank_type,
        online_list,
    });
    Parsed { event, user: None, medal: None }
}

/// Dispatch a raw frame by its `cmd` tag. Unknown kinds return `None` and
/// are logged once by the caller (spec §7's "unknown message kind" is
/// protocol-terminal, not fatal).
pub fn parse(agent_id: &str, frame: &RawFrame) -> Option<Parsed> {
    match frame.cmd.as_str() {
        "DANMU_MSG" => Some(parse_damaku(agent_id, frame.room_id, &frame.body)),
        "SEND_GIFT" => Some(parse_gift(agent_id, frame.room_id, &frame.body)),
        "GUARD_BUY" => Some(parse_guard(agent_id, frame.room_id, &frame.body)),
        "SUPER_CHAT_MESSAGE" => Some(parse_super_chat(agent_id, frame.room_id, &frame.body)),
        "ONLINE_RANK_COUNT" => Some(parse_online_rank_count(agent_id, frame.room_id, &frame.body)),
        "ONLINE_RANK_V2" => Some(parse_online_rank_v2(agent_id, frame.room_id, &frame.body)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn damaku_extracts_declared_json_paths() {
        let body = json!([
            [0, 0, 0, 0, 1_700_000_000_000u64, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
             { "user": { "base": { "face": "face.png" } } }],
            "hello room",
            [42, "bob"],
            [5, "Fan Club", 0, 0, 0, 0, 0, 0, 0, 0, 1, true, 99]
        ]);

        let parsed = parse_damaku("agent-1", 7, &body);
        let StreamEvent::Damaku(d) = parsed.event else { panic!("expected Damaku") };
        assert_eq!(d.uid, 42);
        assert_eq!(d.username, "bob");
        assert_eq!(d.text, "hello room");
        assert_eq!(d.face.as_deref(), Some("face.png"));
        let medal = d.medal.unwrap();
        assert_eq!(medal.room_uid, 99);
        assert_eq!(medal.name, "Fan Club");
        assert_eq!(medal.level, 5);
        assert!(medal.light);
        assert_eq!(medal.guard_level, GuardLevel::Captain);

        let user = parsed.user.unwrap();
        assert_eq!(user.uid, 42);
        assert_eq!(user.username, "bob");
    }

    #[test]
    fn gift_without_blind_gift_duplicates_info_as_original() {
        let body = json!({
            "timestamp": 1_700_000_000u64,
            "uid": 1, "uname": "alice", "num": 2, "tid": "t-1",
            "giftId": 30020, "giftName": "rose", "price": 100
        });
        let parsed = parse_gift("agent-1", 7, &body);
        let StreamEvent::Gift(g) = parsed.event else { panic!("expected Gift") };
        assert_eq!(g.info, g.original_info);
        assert_eq!(g.meta.timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn gift_with_blind_gift_reveals_original_info() {
        let body = json!({
            "timestamp": 1u64, "uid": 1, "uname": "alice", "num": 1,
            "giftId": 1, "giftName": "mystery box", "price": 10,
            "blind_gift": {
                "original_gift_id": 30020, "original_gift_name": "rose", "original_gift_price": 100
            }
        });
        let parsed = parse_gift("agent-1", 7, &body);
        let StreamEvent::Gift(g) = parsed.event else { panic!("expected Gift") };
        assert_ne!(g.info, g.original_info);
        assert_eq!(g.original_info.name, "rose");
    }

    #[test]
    fn guard_maps_gift_id_to_enum() {
        let body = json!({ "start_time": 1u64, "uid": 1, "username": "bob", "price": 198000, "gift_id": 2 });
        let parsed = parse_guard("agent-1", 7, &body);
        let StreamEvent::Guard(g) = parsed.event else { panic!("expected Guard") };
        assert_eq!(g.gift_type, GuardGiftType::Admiral);
    }

    #[test]
    fn super_chat_timestamp_is_not_rescaled() {
        let body = json!({ "ts": 1_700_000_000_000u64, "id": 9, "uid": 1, "message": "hi", "price": 30 });
        let parsed = parse_super_chat("agent-1", 7, &body);
        let StreamEvent::SuperChat(sc) = parsed.event else { panic!("expected SuperChat") };
        assert_eq!(sc.meta.timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn unknown_cmd_parses_to_none() {
        let frame = RawFrame { room_id: 1, cmd: "SOMETHING_ELSE".to_owned(), body: json!({}), arrived_at: std::time::Instant::now() };
        assert!(parse("agent-1", &frame).is_none());
    }
}
