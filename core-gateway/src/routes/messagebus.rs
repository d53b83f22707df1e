//! # Message Bus WebSocket Upgrade
//!
//! `/messagebus/v1` (spec §4.G, §6): upgrades an authenticated HTTP
//! connection to a WebSocket and hands it to a [`core_bus::connection::Connection`],
//! fanning Redis stream entries out to the socket and client frames back
//! into `core_bus::producer::send_message`/subscription changes.
//!
//! There is no `actix-ws` usage anywhere in the example pack, so the
//! transport glue below (the `actix_ws::handle` call, the select loop, the
//! per-channel reader task bookkeeping) is written from the crate's
//! documented public API rather than a directly-grounded usage pattern —
//! see `DESIGN.md`. The state machine and access rules it drives
//! (`Connection`, `check_channel_access`, `send_message`) are `core-bus`'s,
//! already covered by that crate's own tests.

use std::collections::{HashMap, HashSet};

use actix_web::{web, Error, HttpMessage, HttpRequest, HttpResponse};
use core_bus::{
    Access, ChannelPrincipal, ChannelSubscriptionError, ChannelSubscriptionEvent, ChannelSubscriptionRequest, Connection,
    ConnectionCounter, Message, MessageKind,
};
use core_shared::{RedisFabric, ServiceError, ServiceResult};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::pipeline::context::RequestContext;
use crate::pipeline::error_mapping::{http_error_response, ws_close_reason};
use crate::state::AppState;

/// Batch size handed to `XREADGROUP` for a connection's service-channel
/// subscriptions, mirroring the dispatcher's own small-batch polling.
const GROUP_READ_BATCH: usize = 10;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/messagebus/v1", web::get().to(upgrade));
}

async fn upgrade(req: HttpRequest, body: web::Payload, state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let ctx = req.extensions().get::<RequestContext>().cloned();
    let Some(ctx) = ctx else {
        return Ok(http_error_response(&ServiceError::Internal { message: "request context missing".into() }, false));
    };

    let Some(session) = ctx.session.as_ref().filter(|s| s.authenticated) else {
        return Ok(http_error_response(&ServiceError::MissingCredentials, false));
    };

    let principal = ChannelPrincipal {
        session_id: session.session_id.clone(),
        username: session.username.clone(),
        host_id: session.host.clone(),
        is_admin: session.is_admin,
        authenticated: session.authenticated,
    };

    let (response, session, msg_stream) = actix_ws::handle(&req, body)?;

    let fabric = state.fabric.clone();
    let connections = state.connections.clone();
    actix_web::rt::spawn(async move {
        run_connection(fabric, connections, principal, session, msg_stream).await;
    });

    Ok(response)
}

async fn run_connection(
    fabric: RedisFabric,
    connections: std::sync::Arc<ConnectionCounter>,
    principal: ChannelPrincipal,
    mut ws_session: actix_ws::Session,
    mut msg_stream: actix_ws::MessageStream,
) {
    let mut connection = Connection::new(principal.clone());
    if let Err(error) = connection.open(&fabric, &connections).await {
        tracing::warn!(session_id = %principal.session_id, %error, "failed to open messagebus connection");
        let _ = ws_session.close(Some(ws_close_reason(&error))).await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let mut readers: HashMap<String, JoinHandle<()>> = HashMap::new();
    for channel in connection.subscriptions.clone() {
        spawn_reader(&fabric, &channel, &tx, &mut readers);
    }

    let mut close_error: Option<ServiceError> = None;

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(mut message) = outgoing else { break };
                message.stamp_trace("broker_ws_send", now_ms());
                match message.to_msgpack() {
                    Ok(bytes) => {
                        if ws_session.binary(bytes).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => tracing::warn!(%error, "failed to encode outgoing messagebus frame"),
                }
            }
            frame = msg_stream.next() => {
                match frame {
                    Some(Ok(actix_ws::Message::Binary(bytes))) => {
                        handle_frame(&fabric, &mut connection, &bytes, &tx, &mut readers).await;
                    }
                    Some(Ok(actix_ws::Message::Ping(bytes))) => {
                        if ws_session.pong(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(actix_ws::Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        tracing::debug!(%error, "messagebus frame error, closing connection");
                        close_error = Some(ServiceError::Internal { message: error.to_string() });
                        break;
                    }
                }
            }
        }
    }

    connection.begin_close();
    for (_, handle) in readers.drain() {
        handle.abort();
    }
    if let Err(error) = connection.close(&fabric, &connections).await {
        tracing::warn!(%error, "failed to finalize messagebus connection close");
        close_error = Some(error);
    }
    match close_error {
        Some(error) => {
            let _ = ws_session.close(Some(ws_close_reason(&error))).await;
        }
        None => {
            let _ = ws_session.close(None).await;
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Starts a stream-reader task for `channel` if one isn't already running.
/// Service channels (`service:...`) use the consumer-group reader so only
/// one worker among many claims each entry; every other channel
/// (a session's own inbox, a user/host channel) uses the plain reader.
fn spawn_reader(
    fabric: &RedisFabric,
    channel: &str,
    tx: &mpsc::UnboundedSender<Message>,
    readers: &mut HashMap<String, JoinHandle<()>>,
) {
    if readers.contains_key(channel) {
        return;
    }

    let fabric = fabric.clone();
    let tx = tx.clone();
    let channel_owned = channel.to_string();
    let handle = actix_web::rt::spawn(async move {
        let result = if channel_owned.starts_with("service:") {
            let group = channel_owned.clone();
            let consumer = uuid::Uuid::new_v4().to_string();
            core_bus::run_group_reader(&fabric, &channel_owned, &group, &consumer, GROUP_READ_BATCH, |message| {
                forward(&tx, message)
            })
            .await
        } else {
            core_bus::run_plain_reader(&fabric, &channel_owned, "$".to_string(), |message| forward(&tx, message)).await
        };
        if let Err(error) = result {
            tracing::debug!(channel = %channel_owned, %error, "messagebus reader loop ended");
        }
    });
    readers.insert(channel.to_string(), handle);
}

fn forward(tx: &mpsc::UnboundedSender<Message>, message: Message) -> ServiceResult<()> {
    tx.send(message).map_err(|_| ServiceError::Internal { message: "messagebus receiver dropped".into() })
}

async fn handle_frame(
    fabric: &RedisFabric,
    connection: &mut Connection,
    bytes: &[u8],
    tx: &mpsc::UnboundedSender<Message>,
    readers: &mut HashMap<String, JoinHandle<()>>,
) {
    let message = match Message::from_msgpack(bytes) {
        Ok(message) => message,
        Err(error) => {
            tracing::warn!(%error, "dropping malformed messagebus client frame");
            return;
        }
    };

    if message.kind == MessageKind::ChannelSubscriptionRequest {
        handle_subscription_request(fabric, connection, message, tx, readers).await;
        return;
    }

    if let Err(error) = publish(fabric, connection, message).await {
        tracing::warn!(%error, "failed to publish client messagebus frame");
    }
}

async fn publish(fabric: &RedisFabric, connection: &Connection, message: Message) -> ServiceResult<()> {
    let expanded = core_bus::expand_shorthand(&message.channel, &connection.principal)?;
    core_bus::check_channel_access(&expanded, &connection.principal, Access::Write)?;
    core_bus::send_message(fabric, &connection.principal, message).await?;
    Ok(())
}

/// Applies a `ChannelSubscriptionRequest`, starting/stopping reader tasks for
/// the resulting diff, and replies with a `ChannelSubscriptionEvent` sent
/// straight back over `tx` (not round-tripped through Redis — it answers
/// this connection's own request, nothing else needs to see it).
async fn handle_subscription_request(
    fabric: &RedisFabric,
    connection: &mut Connection,
    message: Message,
    tx: &mpsc::UnboundedSender<Message>,
    readers: &mut HashMap<String, JoinHandle<()>>,
) {
    if !connection.state.accepts_subscriptions() {
        return;
    }

    let request: ChannelSubscriptionRequest = match serde_json::from_value(message.data.clone()) {
        Ok(request) => request,
        Err(error) => {
            tracing::warn!(%error, "malformed channel subscription request");
            return;
        }
    };

    let mut accepted = Vec::new();
    let mut errors = Vec::new();
    for raw in &request.channels {
        let outcome = core_bus::expand_shorthand(raw, &connection.principal)
            .and_then(|expanded| core_bus::check_channel_access(&expanded, &connection.principal, Access::Read).map(|()| expanded));
        match outcome {
            Ok(expanded) => accepted.push(expanded),
            Err(error) => errors.push(ChannelSubscriptionError { channel: raw.clone(), error: error.to_string() }),
        }
    }

    let previous: HashSet<String> = connection.subscriptions.clone();
    connection.apply_subscription(request.operation, &accepted);

    for channel in connection.subscriptions.difference(&previous).cloned().collect::<Vec<_>>() {
        spawn_reader(fabric, &channel, tx, readers);
    }
    for channel in previous.difference(&connection.subscriptions) {
        if let Some(handle) = readers.remove(channel) {
            handle.abort();
        }
    }

    let event = ChannelSubscriptionEvent {
        subscribed_channels: connection.subscriptions.iter().cloned().collect(),
        errors,
    };
    let payload = serde_json::to_value(&event).unwrap_or(serde_json::Value::Null);
    let back_channel = message.back_channel.clone().unwrap_or_else(|| connection.principal.session_channel());
    let reply = Message::new(MessageKind::ChannelSubscriptionEvent, "service", &back_channel, payload);
    let _ = tx.send(reply);
}
