//! Payload definitions
//!
//! Structures carried in the `d` field of gateway frames, in both directions.

use serde::{Deserialize, Serialize};
use switchboard_core::{Intents, Snowflake};

/// Payload for op 10 (Hello)
///
/// Sent by the server immediately after connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

impl HelloPayload {
    /// Interval the service advertises by default (41.25 seconds)
    pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 41_250;

    /// Create a Hello payload with a custom interval
    #[must_use]
    pub fn with_interval(heartbeat_interval: u64) -> Self {
        Self { heartbeat_interval }
    }
}

impl Default for HelloPayload {
    fn default() -> Self {
        Self::with_interval(Self::DEFAULT_HEARTBEAT_INTERVAL)
    }
}

/// The parts of the READY dispatch the session cares about
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
    /// Session to resume later
    pub session_id: String,

    /// Endpoint to use for resuming this session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_gateway_url: Option<String>,

    /// `[shard_id, shard_count]` echoed back by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Bot token
    pub token: String,

    /// Gateway intents
    pub intents: Intents,

    /// Client connection properties
    pub properties: IdentifyProperties,

    /// Ask the server to zlib-compress every frame
    #[serde(default)]
    pub compress: bool,

    /// Member count above which a guild counts as large (50-250)
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u8,

    /// `[shard_id, shard_count]`
    pub shard: [u32; 2],

    /// Initial presence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<UpdatePresencePayload>,
}

fn default_large_threshold() -> u8 {
    50
}

/// Client connection properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    /// Operating system
    pub os: String,

    /// Library name
    pub browser: String,

    /// Library name
    pub device: String,
}

impl IdentifyProperties {
    /// Properties describing this library on the current platform
    #[must_use]
    pub fn library() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
        }
    }

    /// Set operating system
    #[must_use]
    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = os.into();
        self
    }
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self::library()
    }
}

/// Payload for op 6 (Resume)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Bot token
    pub token: String,

    /// Session ID to resume
    pub session_id: String,

    /// Last received sequence number
    pub seq: u64,
}

/// Payload for op 3 (Presence Update)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePresencePayload {
    /// Unix time (ms) since the client went idle
    pub since: Option<u64>,

    /// Activities, passed through untouched
    #[serde(default)]
    pub activities: Vec<serde_json::Value>,

    /// New status (online, idle, dnd, invisible, offline)
    pub status: String,

    /// Whether the client is AFK
    #[serde(default)]
    pub afk: bool,
}

impl UpdatePresencePayload {
    /// Valid status values
    pub const VALID_STATUSES: &'static [&'static str] =
        &["online", "idle", "dnd", "invisible", "offline"];

    /// Presence with just a status
    #[must_use]
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            since: None,
            activities: Vec::new(),
            status: status.into(),
            afk: false,
        }
    }

    /// Check if the status is valid
    #[must_use]
    pub fn is_valid_status(&self) -> bool {
        Self::VALID_STATUSES.contains(&self.status.as_str())
    }
}

/// Payload for op 4 (Voice State Update)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateVoiceStatePayload {
    pub guild_id: Snowflake,
    /// `None` disconnects from voice
    pub channel_id: Option<Snowflake>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// Payload for op 8 (Request Guild Members)
///
/// One request may list several guilds; the shard manager splits it per owning shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestGuildMembersPayload {
    #[serde(rename = "guild_id")]
    pub guild_ids: Vec<Snowflake>,

    /// Username prefix, empty string for everyone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Maximum members to send, 0 for no limit
    #[serde(default)]
    pub limit: u32,

    #[serde(default)]
    pub presences: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_ids: Vec<Snowflake>,

    /// Echoed back in the member chunks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl RequestGuildMembersPayload {
    /// Request every member of the given guilds
    #[must_use]
    pub fn all_members(guild_ids: Vec<Snowflake>) -> Self {
        Self {
            guild_ids,
            query: Some(String::new()),
            limit: 0,
            presences: false,
            user_ids: Vec::new(),
            nonce: None,
        }
    }

    /// Copy of this request restricted to other guilds
    #[must_use]
    pub fn with_guilds(&self, guild_ids: Vec<Snowflake>) -> Self {
        Self {
            guild_ids,
            ..self.clone()
        }
    }

    /// Whether two requests differ only in the guilds they target
    #[must_use]
    pub fn same_request(&self, other: &Self) -> bool {
        self.query == other.query
            && self.limit == other.limit
            && self.presences == other.presences
            && self.user_ids == other.user_ids
            && self.nonce == other.nonce
    }
}
