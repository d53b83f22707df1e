//! # opsi-core-svc
//!
//! Entry point: parses the CLI (spec §4.D), then dispatches to the
//! arbiter (`start`), a signal to a running instance (`stop`/`force-stop`/
//! `reload`), or one of the standalone maintenance subcommands.

use clap::Parser;
use core_gateway::cli::{Cli, Command};
use core_shared::{AppConfig, RedisFabric};
use std::process::ExitCode;

#[actix_web::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start => start().await,
        Command::Stop | Command::ForceStop | Command::Restart | Command::Reload => {
            // Signaling a separately-running process is an operational
            // concern (find its pid, send the signal) that this binary
            // doesn't own in a single-process deployment; a full rollout
            // would locate the arbiter's pidfile here.
            eprintln!("this subcommand targets a separately-running instance; send the signal directly (see spec §4.D)");
            Err(())
        }
        Command::Status | Command::HealthCheck => health_check().await,
        Command::Setup => setup().await,
        Command::LogViewer => log_viewer().await,
        Command::Backup { path } => backup(&path).await,
        Command::Restore { path } => restore(&path).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(()) => ExitCode::FAILURE,
    }
}

async fn start() -> Result<(), ()> {
    let config = AppConfig::from_env().map_err(|e| eprintln!("failed to load configuration: {e}"))?;
    core_gateway::arbiter::run(config).await.map_err(|e| eprintln!("arbiter exited with an error: {e}"))
}

async fn health_check() -> Result<(), ()> {
    let config = AppConfig::from_env().map_err(|e| eprintln!("failed to load configuration: {e}"))?;
    let fabric = RedisFabric::new(&config.redis).await.map_err(|e| eprintln!("redis connection failed: {e}"))?;
    fabric.ping().await.map_err(|e| eprintln!("redis unreachable: {e}"))?;
    println!("ok");
    Ok(())
}

async fn setup() -> Result<(), ()> {
    let config = AppConfig::from_env().map_err(|e| eprintln!("failed to load configuration: {e}"))?;
    let log_dir = std::path::Path::new(&config.logging.log_directory);
    let purge_window = std::time::Duration::from_secs(u64::from(config.logging.purge_after_days) * 24 * 60 * 60);
    match core_logfabric::purge_old_logs(log_dir, purge_window) {
        Ok(removed) => println!("purged {removed} expired log file(s)"),
        Err(e) => eprintln!("log purge failed: {e}"),
    }
    Ok(())
}

async fn log_viewer() -> Result<(), ()> {
    let config = AppConfig::from_env().map_err(|e| eprintln!("failed to load configuration: {e}"))?;
    let fabric = RedisFabric::new(&config.redis).await.map_err(|e| eprintln!("redis connection failed: {e}"))?;
    let stream_key = fabric.key(&format!("log:{}", config.service_name));
    println!("tailing {stream_key} (ctrl-c to exit)");
    let mut last_id = "$".to_string();
    loop {
        let entries = fabric
            .xread(&stream_key, &last_id, std::time::Duration::from_secs(5))
            .await
            .map_err(|e| eprintln!("log stream read failed: {e}"))?;
        for (entry_id, fields) in entries {
            last_id = entry_id;
            if let Some((_, raw)) = fields.into_iter().find(|(field, _)| field == "record") {
                match rmp_serde::from_slice::<core_shared::tracing_config::LogRecord>(&raw) {
                    Ok(record) => println!("{} {:>5} {} {}", record.timestamp.to_rfc3339(), record.level, record.target, record.message),
                    Err(e) => eprintln!("malformed log record: {e}"),
                }
            }
        }
    }
}

async fn backup(path: &str) -> Result<(), ()> {
    let config = AppConfig::from_env().map_err(|e| eprintln!("failed to load configuration: {e}"))?;
    let fabric = RedisFabric::new(&config.redis).await.map_err(|e| eprintln!("redis connection failed: {e}"))?;

    let pattern = fabric.key("session:*");
    let keys = fabric.scan_keys(&pattern).await.map_err(|e| eprintln!("failed to list session keys: {e}"))?;

    let mut snapshot = Vec::new();
    for key in keys {
        if let Some(value) = fabric.get_bytes(&key).await.map_err(|e| eprintln!("failed to read {key}: {e}"))? {
            snapshot.push((key, value));
        }
    }

    let encoded = rmp_serde::to_vec_named(&snapshot).map_err(|e| eprintln!("failed to encode backup: {e}"))?;
    std::fs::write(path, encoded).map_err(|e| eprintln!("failed to write {path}: {e}"))?;
    println!("wrote {} session key(s) to {path}", snapshot.len());
    Ok(())
}

async fn restore(path: &str) -> Result<(), ()> {
    let config = AppConfig::from_env().map_err(|e| eprintln!("failed to load configuration: {e}"))?;
    let fabric = RedisFabric::new(&config.redis).await.map_err(|e| eprintln!("redis connection failed: {e}"))?;

    let bytes = std::fs::read(path).map_err(|e| eprintln!("failed to read {path}: {e}"))?;
    let snapshot: Vec<(String, Vec<u8>)> = rmp_serde::from_slice(&bytes).map_err(|e| eprintln!("malformed backup file: {e}"))?;

    for (key, value) in &snapshot {
        fabric.set_bytes(key, value, None).await.map_err(|e| eprintln!("failed to restore {key}: {e}"))?;
    }
    println!("restored {} session key(s) from {path}", snapshot.len());
    Ok(())
}
