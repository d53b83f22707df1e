//! # Per-Client Rotating File Handler
//!
//! Lazily-created file handles per client address, size-based rotation
//! with `keep_rotated_logs` backups, idle-window eviction, and the
//! `<fqdn>.log` → `<ip>.log` symlink (spec §4.I), grounded on the handler
//! pool in `original_source/opsiconfd/logging.py`.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct ClientHandle {
    file: std::fs::File,
    bytes_written: u64,
    last_write: Instant,
}

/// Owns the pool of open per-client log files. Not `Send` across an await
/// point by itself — the consumer task that owns it drives it from a
/// single-threaded loop, matching the spec's single-threaded worker model.
pub struct FileLogWriter {
    log_dir: PathBuf,
    max_bytes: u64,
    keep_rotated: usize,
    idle_timeout: Duration,
    handles: HashMap<String, ClientHandle>,
}

impl FileLogWriter {
    pub fn new(log_dir: PathBuf, max_bytes: u64, keep_rotated: usize, idle_timeout: Duration) -> Self {
        Self { log_dir, max_bytes, keep_rotated, idle_timeout, handles: HashMap::new() }
    }

    fn log_path(&self, client: &str) -> PathBuf {
        self.log_dir.join(format!("{client}.log"))
    }

    /// Appends `line` to `client`'s log file, opening and rotating it as
    /// needed.
    pub fn write_line(&mut self, client: &str, line: &str) -> std::io::Result<()> {
        self.rotate_if_needed(client, line.len() as u64)?;

        if !self.handles.contains_key(client) {
            std::fs::create_dir_all(&self.log_dir)?;
            let file = OpenOptions::new().create(true).append(true).open(self.log_path(client))?;
            let bytes_written = file.metadata()?.len();
            self.handles.insert(client.to_string(), ClientHandle { file, bytes_written, last_write: Instant::now() });
        }

        let handle = self.handles.get_mut(client).expect("just inserted");
        handle.file.write_all(line.as_bytes())?;
        handle.file.write_all(b"\n")?;
        handle.bytes_written += line.len() as u64 + 1;
        handle.last_write = Instant::now();
        Ok(())
    }

    fn rotate_if_needed(&mut self, client: &str, incoming_len: u64) -> std::io::Result<()> {
        let Some(handle) = self.handles.get(client) else { return Ok(()) };
        if handle.bytes_written + incoming_len < self.max_bytes {
            return Ok(());
        }

        debug!(client, "rotating log file");
        self.handles.remove(client);

        let base = self.log_path(client);
        for index in (1..self.keep_rotated).rev() {
            let from = rotated_path(&base, index);
            let to = rotated_path(&base, index + 1);
            if from.exists() {
                std::fs::rename(from, to)?;
            }
        }
        if base.exists() {
            std::fs::rename(&base, rotated_path(&base, 1))?;
        }
        Ok(())
    }

    /// Closes and drops handles idle longer than `idle_timeout`, freeing
    /// file descriptors for clients that disconnected a while ago.
    pub fn evict_idle(&mut self) {
        let idle_timeout = self.idle_timeout;
        self.handles.retain(|client, handle| {
            let idle = handle.last_write.elapsed() < idle_timeout;
            if !idle {
                debug!(client, "closing idle log handle");
            }
            idle
        });
    }

    /// Maintains a `<fqdn>.log` symlink pointing at `<ip>.log`, so the
    /// same client's log is reachable by either name. No-op if `fqdn`
    /// equals `ip` or the underlying platform can't create symlinks.
    pub fn link_fqdn(&self, fqdn: &str, ip: &str) {
        if fqdn == ip {
            return;
        }
        let link_path = self.log_path(fqdn);
        let target = self.log_path(ip);
        let _ = std::fs::remove_file(&link_path);
        if let Err(e) = symlink(&target, &link_path) {
            warn!(fqdn, ip, error = %e, "failed to create fqdn log symlink");
        }
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::fs::copy(target, link).map(|_| ())
}

fn rotated_path(base: &Path, index: usize) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_line_creates_file_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = FileLogWriter::new(dir.path().to_path_buf(), 1_000_000, 3, Duration::from_secs(60));
        writer.write_line("10.0.0.1", "hello").unwrap();
        assert!(dir.path().join("10.0.0.1.log").exists());
    }

    #[test]
    fn rotation_renames_the_active_file_once_oversized() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = FileLogWriter::new(dir.path().to_path_buf(), 10, 2, Duration::from_secs(60));
        writer.write_line("client", "0123456789").unwrap();
        writer.write_line("client", "more").unwrap();
        assert!(dir.path().join("client.log.1").exists());
        assert!(dir.path().join("client.log").exists());
    }

    #[test]
    fn evict_idle_drops_handles_past_the_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = FileLogWriter::new(dir.path().to_path_buf(), 1_000_000, 3, Duration::from_millis(0));
        writer.write_line("client", "hello").unwrap();
        writer.evict_idle();
        assert!(writer.handles.is_empty());
    }
}
