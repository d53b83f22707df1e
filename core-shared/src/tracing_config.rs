//! # Tracing and Structured Logging Configuration
//!
//! Initializes the logging system with environment-appropriate settings and
//! wires a second sink — a [`tracing_subscriber::Layer`] that forwards every
//! record into an in-process channel so `core-logfabric` can fan them out to
//! the central Redis log stream and per-client rotating files (spec §4.I).
//!
//! ## What is Tracing?
//!
//! [Tracing](https://docs.rs/tracing/) is Rust's structured logging/spans
//! library. Unlike a plain logger it carries key-value fields and lets a
//! span's context (e.g. the client address a request middleware attached)
//! flow down into every event emitted underneath it.
//!
//! ## Output Formats
//!
//! | Environment | Format | Purpose |
//! |-------------|--------|---------|
//! | Development | Pretty | Human-readable, colored output |
//! | Production | JSON | Machine-parseable for log aggregation |
//!
//! ## Filter Configuration
//!
//! Control verbosity via `RUST_LOG`:
//!
//! ```bash
//! RUST_LOG=debug
//! RUST_LOG=info,core_bus=debug
//! RUST_LOG=info,hyper=warn
//! ```
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use core_shared::tracing_config::{init_tracing, redis_log_layer};
//!
//! let (layer, receiver) = redis_log_layer(1024);
//! init_tracing("opsi-core-svc", config.is_production(), layer);
//! // `receiver` is handed to core-logfabric's consumer task.
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::{
    fmt::{self as fmt_layer, format::FmtSpan},
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// One record forwarded to the log fabric consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// RFC3339 timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// `ERROR`/`WARN`/`INFO`/`DEBUG`/`TRACE`.
    pub level: String,
    /// Module path the event was emitted from.
    pub target: String,
    /// Rendered message (the event's `message` field, if present).
    pub message: String,
    /// Remaining structured fields, JSON-encoded.
    pub fields: serde_json::Value,
    /// Client address pulled from the enclosing request span, when present.
    pub client_address: Option<String>,
}

/// Extension type stashed on a request span by `core-gateway`'s pipeline
/// middleware so nested events can be tagged with the originating client.
#[derive(Clone)]
pub struct ClientAddressContext(pub String);

/// A `tracing_subscriber::Layer` that serializes every event into a
/// [`LogRecord`] and sends it down an `mpsc` channel. Never blocks the
/// caller: the channel is bounded and a full channel silently drops records
/// (logging must never back-pressure request handling).
pub struct RedisLogLayer {
    sender: mpsc::Sender<LogRecord>,
}

/// Builds a `RedisLogLayer` plus the receiving half handed to
/// `core-logfabric`'s stream-writer task.
pub fn redis_log_layer(buffer: usize) -> (RedisLogLayer, mpsc::Receiver<LogRecord>) {
    let (sender, receiver) = mpsc::channel(buffer);
    (RedisLogLayer { sender }, receiver)
}

struct FieldVisitor {
    message: String,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.message = rendered;
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(rendered));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }
}

impl<S> Layer<S> for RedisLogLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor { message: String::new(), fields: serde_json::Map::new() };
        event.record(&mut visitor);

        let client_address = ctx.event_scope(event).and_then(|scope| {
            scope.from_root().find_map(|span| {
                span.extensions().get::<ClientAddressContext>().map(|c| c.0.clone())
            })
        });

        let record = LogRecord {
            timestamp: chrono::Utc::now(),
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
            fields: serde_json::Value::Object(visitor.fields),
            client_address,
        };

        // A full channel means the consumer is behind; drop rather than
        // stall the request path that triggered this log line.
        let _ = self.sender.try_send(record);
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let span = match ctx.span(id) {
            Some(span) => span,
            None => return,
        };
        let mut visitor = FieldVisitor { message: String::new(), fields: serde_json::Map::new() };
        attrs.record(&mut visitor);
        if let Some(serde_json::Value::String(addr)) = visitor.fields.get("client_address") {
            span.extensions_mut().insert(ClientAddressContext(addr.clone()));
        }
    }
}

/// Initializes the tracing/logging system. Call once at process startup,
/// before any other code emits logs. `log_layer` is produced by
/// [`redis_log_layer`] and always installed alongside the terminal sink.
pub fn init_tracing(service_name: &str, is_production: bool, log_layer: RedisLogLayer) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if is_production {
            EnvFilter::new("info")
        } else {
            EnvFilter::new("debug,hyper=info")
        }
    });

    let registry = tracing_subscriber::registry().with(env_filter).with(log_layer);

    if is_production {
        registry
            .with(
                fmt_layer::layer()
                    .json()
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(true)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true)
                    .with_current_span(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt_layer::layer()
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
    }

    tracing::info!(service = service_name, production = is_production, "tracing initialized");
}

/// Creates a span for tracking an HTTP/WS request, tagging it with the
/// client address so nested events pick it up via [`RedisLogLayer`].
#[macro_export]
macro_rules! request_span {
    ($request_id:expr, $method:expr, $path:expr, $client_address:expr) => {
        tracing::info_span!(
            "request",
            request_id = %$request_id,
            method = %$method,
            path = %$path,
            client_address = %$client_address,
        )
    };
}

/// Logs an error with context, in a consistent shape across the workspace.
pub fn log_error<E: std::fmt::Display>(error: &E, context: &str) {
    tracing::error!(error = %error, context = context, "error occurred");
}

/// Logs a warning with context.
pub fn log_warning(message: &str, context: &str) {
    tracing::warn!(message = message, context = context, "warning");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn layer_construction_yields_connected_channel() {
        let (layer, mut receiver) = redis_log_layer(4);
        let _ = layer.sender.try_send(LogRecord {
            timestamp: chrono::Utc::now(),
            level: "INFO".into(),
            target: "test".into(),
            message: "hello".into(),
            fields: serde_json::json!({}),
            client_address: None,
        });
        let received = receiver.recv().await.expect("record delivered");
        assert_eq!(received.message, "hello");
    }
}
