//! Hub message and negotiation payload types.
//!
//! `HubMessage` is the tagged sum type carried by both wire codecs; the
//! JSON codec keys it by an integer `type` field, the MessagePack codec
//! by position. Both live in [`crate::codec`].

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HubError;
use crate::framing;

/// One logical RPC event passed between the hub invocation layer and the
/// wire.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// A call to a named target, optionally expecting a reply.
    Invocation {
        /// Present iff the caller expects a `Completion` in response.
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
        /// `true` for fire-and-forget calls that never produce a
        /// `Completion`.
        non_blocking: bool,
    },
    /// One item of a server-to-client stream identified by `invocation_id`.
    StreamItem {
        invocation_id: String,
        item: Value,
    },
    /// Terminal reply to an `Invocation`. Carries at most one of
    /// `result` / `error`.
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
}

/// Integer type discriminators used by the JSON codec's `type` field and
/// as the first element of the MessagePack positional array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Invocation = 1,
    StreamItem = 2,
    Completion = 3,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(MessageType::Invocation),
            2 => Some(MessageType::StreamItem),
            3 => Some(MessageType::Completion),
            _ => None,
        }
    }
}

impl HubMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            HubMessage::Invocation { .. } => MessageType::Invocation,
            HubMessage::StreamItem { .. } => MessageType::StreamItem,
            HubMessage::Completion { .. } => MessageType::Completion,
        }
    }

    /// The `invocationId` this message carries, if any.
    pub fn invocation_id(&self) -> Option<&str> {
        match self {
            HubMessage::Invocation { invocation_id, .. } => invocation_id.as_deref(),
            HubMessage::StreamItem { invocation_id, .. } => Some(invocation_id),
            HubMessage::Completion { invocation_id, .. } => Some(invocation_id),
        }
    }
}

/// The handshake payload exchanged before any `HubMessage` traffic:
/// `{"protocol": "<name>"}`, record-separator terminated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationMessage {
    pub protocol: String,
}

impl NegotiationMessage {
    pub fn new(protocol: impl Into<String>) -> Self {
        NegotiationMessage {
            protocol: protocol.into(),
        }
    }
}

/// Serialize `protocol` as a negotiation record and append it (with its
/// `0x1E` terminator) to `out`. Both transports call this instead of
/// hand-rolling the handshake frame themselves.
pub fn encode_negotiation(protocol: &str, out: &mut BytesMut) {
    let bytes = serde_json::to_vec(&NegotiationMessage::new(protocol))
        .expect("NegotiationMessage always serializes");
    framing::text::encode(&bytes, out);
}

/// Pull one negotiation record off the front of `input`, if a complete one
/// is present.
///
/// Returns `Ok(None)` only when `input` doesn't yet hold a full
/// record-separator-terminated frame — a closed/empty stream, from the
/// caller's point of view. A record that *is* present but isn't a JSON
/// object with a string `protocol` field is a hard [`HubError::Protocol`],
/// distinct from that "nothing here yet" case.
pub fn decode_negotiation(input: &mut BytesMut) -> Result<Option<NegotiationMessage>, HubError> {
    match framing::text::decode(input)? {
        Some(record) => serde_json::from_slice::<NegotiationMessage>(&record)
            .map(Some)
            .map_err(|e| HubError::protocol(format!("malformed negotiation record: {e}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_through_u8() {
        for mt in [
            MessageType::Invocation,
            MessageType::StreamItem,
            MessageType::Completion,
        ] {
            assert_eq!(MessageType::from_u8(mt as u8), Some(mt));
        }
    }

    #[test]
    fn unknown_discriminator_is_none() {
        assert_eq!(MessageType::from_u8(99), None);
    }

    #[test]
    fn invocation_id_accessor_covers_all_variants() {
        let inv = HubMessage::Invocation {
            invocation_id: Some("1".into()),
            target: "Send".into(),
            arguments: vec![],
            non_blocking: false,
        };
        assert_eq!(inv.invocation_id(), Some("1"));

        let fire_and_forget = HubMessage::Invocation {
            invocation_id: None,
            target: "Send".into(),
            arguments: vec![],
            non_blocking: true,
        };
        assert_eq!(fire_and_forget.invocation_id(), None);

        let stream = HubMessage::StreamItem {
            invocation_id: "2".into(),
            item: Value::Null,
        };
        assert_eq!(stream.invocation_id(), Some("2"));

        let completion = HubMessage::Completion {
            invocation_id: "3".into(),
            result: None,
            error: None,
        };
        assert_eq!(completion.invocation_id(), Some("3"));
    }

    #[test]
    fn negotiation_round_trips() {
        let mut buf = BytesMut::new();
        encode_negotiation("json", &mut buf);
        assert_eq!(buf.last().copied(), Some(framing::RECORD_SEPARATOR));
        let negotiation = decode_negotiation(&mut buf).unwrap().unwrap();
        assert_eq!(negotiation.protocol, "json");
        assert!(buf.is_empty());
    }

    #[test]
    fn negotiation_decode_is_none_on_partial_record() {
        let mut buf = BytesMut::from(&br#"{"protocol":"js"#[..]);
        assert_eq!(decode_negotiation(&mut buf).unwrap(), None);
        assert!(!buf.is_empty());
    }

    #[test]
    fn negotiation_decode_rejects_missing_protocol_field() {
        let mut buf = BytesMut::new();
        framing::text::encode(br#"{"not-protocol":"json"}"#, &mut buf);
        let err = decode_negotiation(&mut buf).unwrap_err();
        assert!(matches!(err, HubError::Protocol(_)));
    }

    #[test]
    fn negotiation_decode_rejects_non_object_record() {
        let mut buf = BytesMut::new();
        framing::text::encode(br#""json""#, &mut buf);
        let err = decode_negotiation(&mut buf).unwrap_err();
        assert!(matches!(err, HubError::Protocol(_)));
    }
}
