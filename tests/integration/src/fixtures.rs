//! Server frames and entity ids used across tests

use serde_json::json;
use switchboard_core::Snowflake;
use switchboard_gateway::protocol::{GatewayMessage, RequestGuildMembersPayload};
use switchboard_gateway::GatewayCommand;

pub const GATEWAY_URL: &str = "wss://gateway.test";
pub const RESUME_URL: &str = "wss://resume.test";

/// Full endpoint a shard opens for `base`
pub fn endpoint(base: &str) -> String {
    format!("{base}/?v=10&encoding=json")
}

pub fn ready(sequence: u64, session_id: &str) -> GatewayMessage {
    GatewayMessage::dispatch(
        "READY",
        sequence,
        json!({
            "v": 10,
            "session_id": session_id,
            "resume_gateway_url": RESUME_URL,
            "guilds": [],
        }),
    )
}

pub fn dispatch(name: &str, sequence: u64) -> GatewayMessage {
    GatewayMessage::dispatch(name, sequence, json!({ "id": "1" }))
}

/// Guild id owned by shard `shard` of `total`
pub fn guild_on(shard: u32, total: u32, salt: u64) -> Snowflake {
    Snowflake::new((u64::from(shard) + u64::from(total) * salt) << 22)
}

/// Guild ids with consecutive timestamps, spreading over any shard count
pub fn guilds(range: std::ops::Range<u64>) -> Vec<Snowflake> {
    range.map(|i| Snowflake::new(i << 22)).collect()
}

pub fn members_request(guild_ids: Vec<Snowflake>) -> GatewayCommand {
    RequestGuildMembersPayload::all_members(guild_ids).into()
}
