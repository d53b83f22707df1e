//! # WebSocket Connection State Machine
//!
//! The per-connection lifecycle spec §4.G.3 describes:
//! `Connected → Authorized → Subscribed(default) ↔ Subscribed(custom) →
//! Closing → Closed`, plus the connection-counted `event:host_connected`/
//! `event:user_connected` (and their `_disconnected` counterparts) emitted
//! only on a 0→1 / 1→0 transition (spec §4.G.5). Grounded on
//! `original_source/opsiconfd/messagebus/websocket.py`'s
//! `MessagebusWebSocketHandler`; there is no `actix-ws` usage anywhere in
//! the example pack to crib the transport glue from; the state machine and
//! registry below are written from the crate's documented public API.

use crate::channel::ChannelPrincipal;
use crate::message::{Message, MessageKind};
use crate::producer::send_message;
use core_shared::{RedisFabric, ServiceResult};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Lifecycle state of a single WebSocket connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP/HTTP upgrade complete, no identity attached yet.
    Connected,
    /// Credentials validated; default channels not yet subscribed.
    Authorized,
    /// Listening on the default channel set (`session:<sid>` plus, for a
    /// host connection, its `host:<id>` channel).
    SubscribedDefault,
    /// The client has issued at least one `ChannelSubscriptionRequest`
    /// beyond the default set.
    SubscribedCustom,
    /// Close handshake started, no further subscriptions accepted.
    Closing,
    Closed,
}

impl ConnectionState {
    /// Whether a subscription request may still be processed in this state.
    pub fn accepts_subscriptions(&self) -> bool {
        matches!(self, Self::Authorized | Self::SubscribedDefault | Self::SubscribedCustom)
    }
}

/// Tracks how many live connections exist per principal identity
/// (`host:<id>` / `user:<name>`), so connect/disconnect events fire only on
/// the 0→1 and 1→0 edges rather than once per connection.
#[derive(Default)]
pub struct ConnectionCounter {
    counts: Mutex<HashMap<String, usize>>,
}

impl ConnectionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection for `identity`. Returns `true` if this is
    /// the first live connection for that identity.
    pub fn connect(&self, identity: &str) -> bool {
        let mut counts = self.counts.lock().unwrap();
        let entry = counts.entry(identity.to_string()).or_insert(0);
        *entry += 1;
        *entry == 1
    }

    /// Deregisters a connection for `identity`. Returns `true` if that was
    /// the last live connection for that identity.
    pub fn disconnect(&self, identity: &str) -> bool {
        let mut counts = self.counts.lock().unwrap();
        match counts.get_mut(identity) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                counts.remove(identity);
                true
            }
            None => false,
        }
    }
}

/// Per-connection bookkeeping the WebSocket handler task owns for its
/// lifetime. The actual `actix_ws::Session`/`MessageStream` plumbing lives
/// in `core-gateway`, which owns the HTTP route; this type holds everything
/// about the connection that `core-bus` itself needs to reason about.
pub struct Connection {
    pub principal: ChannelPrincipal,
    pub state: ConnectionState,
    pub subscriptions: HashSet<String>,
}

impl Connection {
    pub fn new(principal: ChannelPrincipal) -> Self {
        let mut subscriptions = HashSet::new();
        subscriptions.insert(principal.session_channel());
        if let Some(own) = principal.own_channel() {
            subscriptions.insert(own);
        }
        Self { principal, state: ConnectionState::Authorized, subscriptions }
    }

    /// Moves into the default-subscribed state and emits the connect event
    /// if this is the identity's first live connection.
    pub async fn open(
        &mut self,
        fabric: &RedisFabric,
        counter: &ConnectionCounter,
    ) -> ServiceResult<()> {
        self.state = ConnectionState::SubscribedDefault;
        if let Some(identity) = self.principal.own_channel() {
            if counter.connect(&identity) {
                self.emit_presence_event(fabric, &identity, true).await?;
            }
        }
        Ok(())
    }

    /// Applies a subscription change, moving to `SubscribedCustom` once the
    /// set diverges from just the defaults.
    pub fn apply_subscription(&mut self, operation: crate::message::SubscriptionOperation, channels: &[String]) {
        use crate::message::SubscriptionOperation::*;
        match operation {
            Add => self.subscriptions.extend(channels.iter().cloned()),
            Remove => {
                for c in channels {
                    self.subscriptions.remove(c);
                }
            }
            Set => {
                self.subscriptions = channels.iter().cloned().collect();
            }
        }
        self.state = ConnectionState::SubscribedCustom;
    }

    /// Transitions to `Closing`; the handler stops accepting new frames but
    /// may still flush pending sends.
    pub fn begin_close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closing;
        }
    }

    /// Finalizes the close, emitting the disconnect event if this was the
    /// identity's last live connection.
    pub async fn close(
        &mut self,
        fabric: &RedisFabric,
        counter: &ConnectionCounter,
    ) -> ServiceResult<()> {
        self.state = ConnectionState::Closed;
        if let Some(identity) = self.principal.own_channel() {
            if counter.disconnect(&identity) {
                self.emit_presence_event(fabric, &identity, false).await?;
            }
        }
        Ok(())
    }

    async fn emit_presence_event(&self, fabric: &RedisFabric, identity: &str, connected: bool) -> ServiceResult<()> {
        let (kind, suffix) = if identity.starts_with("host:") {
            ("host", if connected { "host_connected" } else { "host_disconnected" })
        } else {
            ("user", if connected { "user_connected" } else { "user_disconnected" })
        };
        let payload = serde_json::json!({ kind: { "id": identity } });
        let event = Message::new(MessageKind::Event, identity, &format!("event:{suffix}"), payload);
        send_message(fabric, &self.principal, event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_fires_only_on_first_and_last_connection() {
        let counter = ConnectionCounter::new();
        assert!(counter.connect("host:h1"));
        assert!(!counter.connect("host:h1"));
        assert!(!counter.disconnect("host:h1"));
        assert!(counter.disconnect("host:h1"));
    }

    #[test]
    fn new_connection_starts_authorized_with_default_channels() {
        let principal = ChannelPrincipal {
            session_id: "sid1".into(),
            username: Some("alice".into()),
            host_id: None,
            is_admin: false,
            authenticated: true,
        };
        let connection = Connection::new(principal);
        assert_eq!(connection.state, ConnectionState::Authorized);
        assert!(connection.subscriptions.contains("session:sid1"));
        assert!(connection.subscriptions.contains("user:alice"));
    }

    #[test]
    fn subscription_change_moves_to_custom_state() {
        let principal = ChannelPrincipal {
            session_id: "sid1".into(),
            username: Some("alice".into()),
            host_id: None,
            is_admin: false,
            authenticated: true,
        };
        let mut connection = Connection::new(principal);
        connection.state = ConnectionState::SubscribedDefault;
        connection.apply_subscription(crate::message::SubscriptionOperation::Add, &["event:host_connected".to_string()]);
        assert_eq!(connection.state, ConnectionState::SubscribedCustom);
        assert!(connection.subscriptions.contains("event:host_connected"));
    }
}
