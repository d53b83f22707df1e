//! # Message Bus
//!
//! Channel-addressed pub/sub over Redis streams (spec §4.G): the wire
//! message envelope, the channel model and its access rules, the producer
//! (`send_message`), the plain/consumer-group reader loops, and the
//! WebSocket connection state machine. The HTTP upgrade itself — the
//! `actix-web` route that hands a socket to [`connection::Connection`] —
//! lives in `core-gateway`, which owns the request pipeline.

pub mod channel;
pub mod connection;
pub mod message;
pub mod producer;
pub mod reader;

pub use channel::{check_channel_access, expand_shorthand, Access, ChannelPrincipal};
pub use connection::{Connection, ConnectionCounter, ConnectionState};
pub use message::{
    ChannelSubscriptionError, ChannelSubscriptionEvent, ChannelSubscriptionRequest, Message, MessageKind,
    SubscriptionOperation, Trace,
};
pub use producer::{send_message, DEFAULT_STREAM_MAXLEN};
pub use reader::{run_group_reader, run_plain_reader};
