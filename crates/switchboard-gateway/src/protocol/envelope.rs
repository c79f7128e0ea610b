//! Inbound envelope
//!
//! The generic part of every received frame: op code, sequence number, event name and the raw
//! payload bytes. Decoding into typed events happens downstream.

use super::OpCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::borrow::Cow;

#[derive(Deserialize)]
struct RawFrame<'a> {
    op: u8,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default, borrow)]
    t: Option<Cow<'a, str>>,
    #[serde(default, borrow)]
    d: Option<&'a RawValue>,
}

/// A decoded inbound frame
///
/// Envelopes are recycled through [`EnvelopePool`](crate::pool::EnvelopePool), so decoding
/// reuses the buffers of a previous frame.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Envelope {
    op: u8,
    sequence: Option<u64>,
    event_name: String,
    payload: Vec<u8>,
}

impl Envelope {
    /// Decode `bytes` into this envelope, overwriting previous contents
    pub fn decode_from(&mut self, bytes: &[u8]) -> Result<(), serde_json::Error> {
        let frame: RawFrame<'_> = serde_json::from_slice(bytes)?;

        self.op = frame.op;
        self.sequence = frame.s;
        self.event_name.clear();
        if let Some(t) = frame.t {
            self.event_name.push_str(&t);
        }
        self.payload.clear();
        if let Some(d) = frame.d {
            self.payload.extend_from_slice(d.get().as_bytes());
        }
        Ok(())
    }

    /// Decode a fresh envelope
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let mut envelope = Self::default();
        envelope.decode_from(bytes)?;
        Ok(envelope)
    }

    /// Raw op code value
    pub fn raw_op(&self) -> u8 {
        self.op
    }

    /// The op code, if it is one this client understands
    pub fn op_code(&self) -> Option<OpCode> {
        OpCode::from_u8(self.op)
    }

    /// Sequence number; only meaningful for Dispatch
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// Event name; empty unless this is a Dispatch
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Raw JSON bytes of the `d` field (empty when absent)
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decode the payload into a typed structure
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        if self.payload.is_empty() {
            return serde_json::from_slice(b"null");
        }
        serde_json::from_slice(&self.payload)
    }

    /// Drop contents but keep allocated capacity
    pub fn reset(&mut self) {
        self.op = 0;
        self.sequence = None;
        self.event_name.clear();
        self.payload.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HelloPayload, ReadyPayload};

    #[test]
    fn test_decode_dispatch_keeps_raw_payload() {
        let env = Envelope::decode(
            br#"{"t":"MESSAGE_CREATE","s":7,"op":0,"d":{"content":"hi \"there\"","id":"9"}}"#,
        )
        .unwrap();

        assert_eq!(env.op_code(), Some(OpCode::Dispatch));
        assert_eq!(env.sequence(), Some(7));
        assert_eq!(env.event_name(), "MESSAGE_CREATE");
        assert_eq!(env.payload(), br#"{"content":"hi \"there\"","id":"9"}"#);
    }

    #[test]
    fn test_decode_null_fields() {
        let env = Envelope::decode(br#"{"op":11,"d":null,"s":null,"t":null}"#).unwrap();
        assert_eq!(env.op_code(), Some(OpCode::HeartbeatAck));
        assert_eq!(env.sequence(), None);
        assert!(env.event_name().is_empty());
        assert!(env.payload().is_empty());
    }

    #[test]
    fn test_decode_reuses_envelope() {
        let mut env = Envelope::decode(br#"{"op":0,"s":1,"t":"READY","d":{"session_id":"s"}}"#)
            .unwrap();
        let ready: ReadyPayload = env.payload_as().unwrap();
        assert_eq!(ready.session_id, "s");

        env.decode_from(br#"{"op":10,"d":{"heartbeat_interval":45000}}"#).unwrap();
        assert_eq!(env.op_code(), Some(OpCode::Hello));
        assert_eq!(env.sequence(), None);
        assert!(env.event_name().is_empty());
        let hello: HelloPayload = env.payload_as().unwrap();
        assert_eq!(hello.heartbeat_interval, 45_000);
    }

    #[test]
    fn test_unknown_op_is_preserved() {
        let env = Envelope::decode(br#"{"op":42}"#).unwrap();
        assert_eq!(env.raw_op(), 42);
        assert_eq!(env.op_code(), None);
    }

    #[test]
    fn test_malformed_frames_fail() {
        assert!(Envelope::decode(b"not json").is_err());
        assert!(Envelope::decode(br#"{"d":{}}"#).is_err());
        assert!(Envelope::decode(br#"{"op":"ten"}"#).is_err());
    }
}
