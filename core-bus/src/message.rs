//! # Message Envelope
//!
//! The wire schema carried over every bus channel (spec §3 "Message"),
//! grounded on the `Message`/`*Event`/`*Request` dataclasses in
//! `original_source/opsiconfd/messagebus/`. Serialized as MessagePack;
//! optional end-to-end lz4/gzip compression is applied to the whole frame
//! by the WebSocket layer, not by this type.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Named timestamp samples a trace-bearing message accumulates as it
/// crosses the bus (spec §3 invariant: `broker_ws_receive`/`broker_ws_send`
/// are always present on such messages once they've crossed once).
pub type Trace = HashMap<String, i64>;

/// One bus message. `kind` distinguishes the payload subtype the way the
/// source's `type` discriminator field does (`type` is a reserved word, so
/// it's renamed on the wire to match the original JSON/MessagePack key).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,

    #[serde(rename = "type")]
    pub kind: MessageKind,

    pub sender: String,
    pub channel: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub back_channel: Option<String>,

    /// Milliseconds since epoch.
    pub created: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<Uuid>,

    #[serde(default)]
    pub trace: Trace,

    /// Type-specific payload. Opaque application messages (JSON-RPC over
    /// bus, terminal, file transfer) carry their own shape here.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Message subtypes the core itself interprets. Anything else passes
/// through as an opaque application message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    ChannelSubscriptionRequest,
    ChannelSubscriptionEvent,
    TraceRequest,
    TraceResponse,
    Event,
    GeneralError,
    /// JSON-RPC-over-bus, terminal, file transfer, and anything else the
    /// core doesn't need to interpret to route correctly.
    Opaque,
}

impl Message {
    /// Builds a message with `created` stamped to now and an empty trace.
    pub fn new(kind: MessageKind, sender: &str, channel: &str, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            sender: sender.to_string(),
            channel: channel.to_string(),
            back_channel: None,
            created: Utc::now().timestamp_millis(),
            expires: None,
            ref_id: None,
            trace: Trace::new(),
            data,
        }
    }

    /// Stamps a named trace timestamp, but only if the message already
    /// carries a trace map (an empty map means the sender never opted into
    /// tracing this message; spec §9 treats unset trace fields as
    /// monotonic-clock-local, not a signal to start tracing now).
    pub fn stamp_trace(&mut self, name: &str, now_ms: i64) {
        if !self.trace.is_empty() || name == "broker_ws_receive" {
            self.trace.insert(name.to_string(), now_ms);
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Payload of a `ChannelSubscriptionRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSubscriptionRequest {
    pub operation: SubscriptionOperation,
    pub channels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back_channel: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionOperation {
    Add,
    Set,
    Remove,
}

/// Payload of a `ChannelSubscriptionEvent`, echoing the outcome back to the
/// requester (including per-channel errors when access was denied).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSubscriptionEvent {
    pub subscribed_channels: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<ChannelSubscriptionError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSubscriptionError {
    pub channel: String,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msgpack_round_trip_preserves_message() {
        let message = Message::new(MessageKind::Event, "service", "event:host_connected", serde_json::json!({"host": {"id": "H1"}}));
        let bytes = message.to_msgpack().unwrap();
        let decoded = Message::from_msgpack(&bytes).unwrap();
        assert_eq!(message, decoded);
    }

    #[test]
    fn trace_stamp_only_applies_once_tracing_started() {
        let mut message = Message::new(MessageKind::Opaque, "u", "session:abc", serde_json::Value::Null);
        message.stamp_trace("broker_ws_send", 100);
        assert!(message.trace.is_empty());
        message.stamp_trace("broker_ws_receive", 50);
        message.stamp_trace("broker_ws_send", 100);
        assert_eq!(message.trace.get("broker_ws_send"), Some(&100));
    }
}
