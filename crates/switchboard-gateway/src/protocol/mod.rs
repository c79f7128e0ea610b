//! Gateway protocol definitions
//!
//! Op codes, close codes, the wire frame, inbound envelopes and the commands callers may send.

mod close_codes;
mod commands;
mod envelope;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::CloseCode;
pub use commands::{GatewayCommand, Routing};
pub use envelope::Envelope;
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{
    HelloPayload, IdentifyPayload, IdentifyProperties, ReadyPayload, RequestGuildMembersPayload,
    ResumePayload, UpdatePresencePayload, UpdateVoiceStatePayload,
};
