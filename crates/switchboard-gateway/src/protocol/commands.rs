//! Caller-issued commands
//!
//! Everything a caller can push through a shard, tagged with how the shard manager routes it.

use super::{
    GatewayMessage, OpCode, RequestGuildMembersPayload, UpdatePresencePayload,
    UpdateVoiceStatePayload,
};
use switchboard_core::Snowflake;

/// How a command finds its shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing<'a> {
    /// One owning entity decides the shard
    Entity(Snowflake),
    /// Every local shard receives a copy
    Broadcast,
    /// Each listed entity is sent to its own shard
    Batch(&'a [Snowflake]),
}

/// An outgoing command
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCommand {
    UpdatePresence(UpdatePresencePayload),
    UpdateVoiceState(UpdateVoiceStatePayload),
    RequestGuildMembers(RequestGuildMembersPayload),
}

impl GatewayCommand {
    /// Op code this command is sent with
    #[must_use]
    pub const fn op(&self) -> OpCode {
        match self {
            Self::UpdatePresence(_) => OpCode::PresenceUpdate,
            Self::UpdateVoiceState(_) => OpCode::VoiceStateUpdate,
            Self::RequestGuildMembers(_) => OpCode::RequestGuildMembers,
        }
    }

    /// Command name, also the key of its rate limit bucket
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::UpdatePresence(_) => "presence_update",
            Self::UpdateVoiceState(_) => "voice_state_update",
            Self::RequestGuildMembers(_) => "request_guild_members",
        }
    }

    #[must_use]
    pub fn routing(&self) -> Routing<'_> {
        match self {
            Self::UpdatePresence(_) => Routing::Broadcast,
            Self::UpdateVoiceState(p) => Routing::Entity(p.guild_id),
            Self::RequestGuildMembers(p) => Routing::Batch(&p.guild_ids),
        }
    }

    /// Copy of a batched command restricted to `entities`; other commands are cloned as is
    #[must_use]
    pub fn for_entities(&self, entities: Vec<Snowflake>) -> Self {
        match self {
            Self::RequestGuildMembers(p) => Self::RequestGuildMembers(p.with_guilds(entities)),
            other => other.clone(),
        }
    }

    /// Entities this command touches
    #[must_use]
    pub fn entities(&self) -> Vec<Snowflake> {
        match self.routing() {
            Routing::Entity(id) => vec![id],
            Routing::Broadcast => Vec::new(),
            Routing::Batch(ids) => ids.to_vec(),
        }
    }

    /// Build the wire frame
    pub fn to_message(&self) -> Result<GatewayMessage, serde_json::Error> {
        match self {
            Self::UpdatePresence(p) => GatewayMessage::update_presence(p),
            Self::UpdateVoiceState(p) => GatewayMessage::update_voice_state(p),
            Self::RequestGuildMembers(p) => GatewayMessage::request_guild_members(p),
        }
    }
}

impl From<UpdatePresencePayload> for GatewayCommand {
    fn from(payload: UpdatePresencePayload) -> Self {
        Self::UpdatePresence(payload)
    }
}

impl From<UpdateVoiceStatePayload> for GatewayCommand {
    fn from(payload: UpdateVoiceStatePayload) -> Self {
        Self::UpdateVoiceState(payload)
    }
}

impl From<RequestGuildMembersPayload> for GatewayCommand {
    fn from(payload: RequestGuildMembersPayload) -> Self {
        Self::RequestGuildMembers(payload)
    }
}
