//! Gateway payload fixtures

use serde_json::{json, Value};

pub const TEST_TOKEN: &str = "integration-token";
pub const SESSION_ID: &str = "session-1";
pub const SELF_USER_ID: &str = "900";

pub fn hello(heartbeat_interval_ms: u64) -> Value {
    json!({"op": 10, "d": {"heartbeat_interval": heartbeat_interval_ms}})
}

pub fn heartbeat_ack() -> Value {
    json!({"op": 11})
}

pub fn dispatch(kind: &str, seq: u64, data: Value) -> Value {
    json!({"op": 0, "t": kind, "s": seq, "d": data})
}

/// Startup payload listing `guild_ids` as unavailable
pub fn ready(resume_url: &str, guild_ids: &[&str]) -> Value {
    let guilds: Vec<Value> = guild_ids
        .iter()
        .map(|id| json!({"id": id, "unavailable": true}))
        .collect();
    dispatch(
        "READY",
        1,
        json!({
            "v": 10,
            "session_id": SESSION_ID,
            "resume_gateway_url": resume_url,
            "user": {"id": SELF_USER_ID, "username": "shardline", "bot": true},
            "guilds": guilds,
        }),
    )
}

pub fn member(user_id: &str) -> Value {
    json!({"user": {"id": user_id, "username": format!("user{user_id}")}})
}

/// Available guild carrying `members`, claiming `member_count` in total
pub fn guild_create(seq: u64, guild_id: &str, member_count: u64, members: Vec<Value>) -> Value {
    dispatch(
        "GUILD_CREATE",
        seq,
        json!({
            "id": guild_id,
            "name": format!("guild {guild_id}"),
            "owner_id": SELF_USER_ID,
            "member_count": member_count,
            "large": member_count > members.len() as u64,
            "members": members,
        }),
    )
}

pub fn members_chunk(seq: u64, guild_id: &str, members: Vec<Value>) -> Value {
    dispatch(
        "GUILD_MEMBERS_CHUNK",
        seq,
        json!({"guild_id": guild_id, "members": members, "chunk_index": 0, "chunk_count": 1}),
    )
}

pub fn message_create(seq: u64, content: &str) -> Value {
    dispatch(
        "MESSAGE_CREATE",
        seq,
        json!({"id": "5000", "channel_id": "42", "content": content}),
    )
}
