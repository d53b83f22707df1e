//! # Log Fabric
//!
//! The consumer side of structured logging (spec §4.I): fans
//! `core_shared::tracing_config::LogRecord`s out to the central Redis log
//! stream and per-client rotating files, and purges the log directory of
//! anything older than 30 days on setup.

pub mod consumer;
pub mod file_writer;
pub mod purge;

pub use consumer::{run_log_consumer, LOG_STREAM_MAXLEN};
pub use file_writer::FileLogWriter;
pub use purge::{purge_old_logs, MAX_LOG_AGE};
