//! # Message Producer
//!
//! `send_message`'s contract (spec §4.G.2), grounded on
//! `original_source/opsiconfd/messagebus/__init__.py`'s `_send_message`:
//! shorthand expansion of `channel`/`back_channel`, a `broker_ws_receive`
//! trace stamp, an `XADD` capped at `DEFAULT_STREAM_MAXLEN` entries, and a
//! TTL refresh on the channel's metadata key so an idle channel can be
//! garbage-collected instead of living forever.

use crate::channel::{expand_shorthand, ChannelPrincipal};
use crate::message::Message;
use chrono::Utc;
use core_shared::{RedisFabric, ServiceError, ServiceResult};
use std::time::Duration;

/// Approximate cap (`XADD ... MAXLEN ~`) applied to every channel stream,
/// per spec §3 "Stream storage".
pub const DEFAULT_STREAM_MAXLEN: usize = 10_000;

/// How long an untouched channel's metadata key survives before the next
/// message extends it again. Not a hard subscription TTL — just garbage
/// collection for channels nobody is listening to any more.
const CHANNEL_METADATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Publishes `message` onto its (possibly shorthand) channel, returning the
/// stream entry id Redis assigned.
pub async fn send_message(
    fabric: &RedisFabric,
    sender: &ChannelPrincipal,
    mut message: Message,
) -> ServiceResult<String> {
    message.channel = expand_shorthand(&message.channel, sender)?;
    if let Some(back_channel) = &message.back_channel {
        message.back_channel = Some(expand_shorthand(back_channel, sender)?);
    }

    message.stamp_trace("broker_ws_receive", Utc::now().timestamp_millis());

    let payload = message
        .to_msgpack()
        .map_err(|e| ServiceError::Internal { message: format!("failed to encode message: {e}") })?;

    let stream_key = fabric.key(&format!("stream:{}", message.channel));
    let entry_id = fabric
        .xadd(&stream_key, &[("message", payload)], Some(DEFAULT_STREAM_MAXLEN))
        .await?;

    let meta_key = fabric.key(&format!("channel:{}:active", message.channel));
    let refreshed = fabric.expire(&meta_key, CHANNEL_METADATA_TTL).await?;
    if !refreshed {
        // Key doesn't exist yet (first message on this channel) — create it.
        fabric.set(&meta_key, &true, Some(CHANNEL_METADATA_TTL)).await?;
    }

    Ok(entry_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn sender() -> ChannelPrincipal {
        ChannelPrincipal {
            session_id: "sid1".into(),
            username: Some("alice".into()),
            host_id: None,
            is_admin: false,
            authenticated: true,
        }
    }

    #[test]
    fn shorthand_expansion_is_pure_before_touching_redis() {
        let principal = sender();
        let message = Message::new(MessageKind::Opaque, "alice", "$", serde_json::Value::Null);
        let expanded = expand_shorthand(&message.channel, &principal).unwrap();
        assert_eq!(expanded, "session:sid1");
    }
}
