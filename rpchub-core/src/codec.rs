//! Pluggable hub message codecs.
//!
//! A [`HubProtocol`] pairs a framing strategy with a wire encoding for
//! [`HubMessage`]. Two implementations ship here: [`JsonHubProtocol`]
//! (record-separator framed JSON objects) and
//! [`MessagePackHubProtocol`] (length-prefixed positional MessagePack
//! arrays). Both share the same trait so the connection core can treat
//! the negotiated protocol opaquely.

use bytes::BytesMut;
use serde_json::{Map, Value, json};

use crate::binder::InvocationBinder;
use crate::error::HubError;
use crate::format::TransferFormat;
use crate::framing;
use crate::message::{HubMessage, MessageType};

/// A hub message encoding paired with its framing strategy.
pub trait HubProtocol: Send + Sync {
    /// The name exchanged during negotiation (`"json"`, `"messagepack"`).
    fn name(&self) -> &'static str;

    /// The transfer format this protocol requires from its transport.
    fn transfer_format(&self) -> TransferFormat;

    /// Serialize one message and append its framing sentinel to `out`.
    fn write_message(&self, message: &HubMessage, out: &mut BytesMut) -> Result<(), HubError>;

    /// Consume zero or more whole messages from the front of `input`,
    /// appending each to `messages`.
    ///
    /// Returns whether any message was consumed. `input` always ends up
    /// holding only the unconsumed, possibly-partial tail; a malformed
    /// record is a hard error rather than a partial-data return.
    fn parse_messages(
        &self,
        input: &mut BytesMut,
        binder: &dyn InvocationBinder,
        messages: &mut Vec<HubMessage>,
    ) -> Result<bool, HubError>;
}

fn check_arity(
    binder: &dyn InvocationBinder,
    target: &str,
    arguments: &[Value],
) -> Result<(), HubError> {
    if let Some(expected) = binder.argument_count(target) {
        if expected != arguments.len() {
            return Err(HubError::protocol(format!(
                "target '{target}' expects {expected} argument(s), got {}",
                arguments.len()
            )));
        }
    }
    Ok(())
}

/// Record-separator framed JSON hub protocol. Each record is a JSON
/// object keyed by an integer `type` discriminator.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonHubProtocol;

impl JsonHubProtocol {
    fn encode_value(message: &HubMessage) -> Value {
        match message {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
                non_blocking,
            } => json!({
                "type": MessageType::Invocation as u8,
                "invocationId": invocation_id,
                "target": target,
                "arguments": arguments,
                "nonBlocking": non_blocking,
            }),
            HubMessage::StreamItem { invocation_id, item } => json!({
                "type": MessageType::StreamItem as u8,
                "invocationId": invocation_id,
                "item": item,
            }),
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => json!({
                "type": MessageType::Completion as u8,
                "invocationId": invocation_id,
                "result": result,
                "error": error,
            }),
        }
    }

    fn decode_value(
        value: Value,
        binder: &dyn InvocationBinder,
    ) -> Result<HubMessage, HubError> {
        let obj = value
            .as_object()
            .ok_or_else(|| HubError::protocol("hub message must be a JSON object"))?;
        let type_num = obj
            .get("type")
            .and_then(Value::as_u64)
            .ok_or_else(|| HubError::protocol("hub message missing integer 'type'"))?;
        let message_type = MessageType::from_u8(type_num as u8)
            .ok_or_else(|| HubError::protocol(format!("unknown message type {type_num}")))?;

        match message_type {
            MessageType::Invocation => {
                let target = field_str(obj, "target")?;
                let arguments = obj
                    .get("arguments")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                check_arity(binder, &target, &arguments)?;
                Ok(HubMessage::Invocation {
                    invocation_id: obj.get("invocationId").and_then(Value::as_str).map(String::from),
                    target,
                    arguments,
                    non_blocking: obj.get("nonBlocking").and_then(Value::as_bool).unwrap_or(false),
                })
            }
            MessageType::StreamItem => Ok(HubMessage::StreamItem {
                invocation_id: field_str(obj, "invocationId")?,
                item: obj.get("item").cloned().unwrap_or(Value::Null),
            }),
            MessageType::Completion => Ok(HubMessage::Completion {
                invocation_id: field_str(obj, "invocationId")?,
                result: obj.get("result").cloned(),
                error: obj.get("error").and_then(Value::as_str).map(String::from),
            }),
        }
    }
}

fn field_str(obj: &Map<String, Value>, key: &str) -> Result<String, HubError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| HubError::protocol(format!("hub message missing string '{key}'")))
}

impl HubProtocol for JsonHubProtocol {
    fn name(&self) -> &'static str {
        "json"
    }

    fn transfer_format(&self) -> TransferFormat {
        TransferFormat::TEXT
    }

    fn write_message(&self, message: &HubMessage, out: &mut BytesMut) -> Result<(), HubError> {
        let value = Self::encode_value(message);
        let bytes = serde_json::to_vec(&value)?;
        framing::text::encode(&bytes, out);
        Ok(())
    }

    fn parse_messages(
        &self,
        input: &mut BytesMut,
        binder: &dyn InvocationBinder,
        messages: &mut Vec<HubMessage>,
    ) -> Result<bool, HubError> {
        let mut progressed = false;
        while let Some(record) = framing::text::decode(input)? {
            let value: Value = serde_json::from_slice(&record)?;
            messages.push(Self::decode_value(value, binder)?);
            progressed = true;
        }
        Ok(progressed)
    }
}

/// Length-prefixed MessagePack hub protocol. Each record is a positional
/// array `[type, ...fields]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePackHubProtocol;

impl MessagePackHubProtocol {
    fn encode_value(message: &HubMessage) -> Value {
        match message {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
                non_blocking,
            } => Value::Array(vec![
                json!(MessageType::Invocation as u8),
                json!(invocation_id),
                json!(target),
                Value::Array(arguments.clone()),
                json!(non_blocking),
            ]),
            HubMessage::StreamItem { invocation_id, item } => Value::Array(vec![
                json!(MessageType::StreamItem as u8),
                json!(invocation_id),
                item.clone(),
            ]),
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => Value::Array(vec![
                json!(MessageType::Completion as u8),
                json!(invocation_id),
                json!(result),
                json!(error),
            ]),
        }
    }

    fn decode_value(
        value: Value,
        binder: &dyn InvocationBinder,
    ) -> Result<HubMessage, HubError> {
        let arr = value
            .as_array()
            .ok_or_else(|| HubError::protocol("hub message must be an array"))?;
        let type_num = arr
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| HubError::protocol("hub message missing integer type element"))?;
        let message_type = MessageType::from_u8(type_num as u8)
            .ok_or_else(|| HubError::protocol(format!("unknown message type {type_num}")))?;

        match message_type {
            MessageType::Invocation => {
                let target = array_str(arr, 2)?;
                let arguments = arr
                    .get(3)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                check_arity(binder, &target, &arguments)?;
                Ok(HubMessage::Invocation {
                    invocation_id: arr.get(1).and_then(Value::as_str).map(String::from),
                    target,
                    arguments,
                    non_blocking: arr.get(4).and_then(Value::as_bool).unwrap_or(false),
                })
            }
            MessageType::StreamItem => Ok(HubMessage::StreamItem {
                invocation_id: array_str(arr, 1)?,
                item: arr.get(2).cloned().unwrap_or(Value::Null),
            }),
            MessageType::Completion => Ok(HubMessage::Completion {
                invocation_id: array_str(arr, 1)?,
                result: arr.get(2).cloned().filter(|v| !v.is_null()),
                error: arr.get(3).and_then(Value::as_str).map(String::from),
            }),
        }
    }
}

fn array_str(arr: &[Value], idx: usize) -> Result<String, HubError> {
    arr.get(idx)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| HubError::protocol(format!("hub message missing string at position {idx}")))
}

impl HubProtocol for MessagePackHubProtocol {
    fn name(&self) -> &'static str {
        "messagepack"
    }

    fn transfer_format(&self) -> TransferFormat {
        TransferFormat::BINARY
    }

    fn write_message(&self, message: &HubMessage, out: &mut BytesMut) -> Result<(), HubError> {
        let value = Self::encode_value(message);
        let bytes = rmp_serde::to_vec(&value)?;
        framing::binary::encode(&bytes, out);
        Ok(())
    }

    fn parse_messages(
        &self,
        input: &mut BytesMut,
        binder: &dyn InvocationBinder,
        messages: &mut Vec<HubMessage>,
    ) -> Result<bool, HubError> {
        let mut progressed = false;
        while let Some(record) = framing::binary::decode(input)? {
            let value: Value = rmp_serde::from_slice(&record)?;
            messages.push(Self::decode_value(value, binder)?);
            progressed = true;
        }
        Ok(progressed)
    }
}
