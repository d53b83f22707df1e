//! # Log Directory Purge
//!
//! Deletes log files older than the retention window (spec §4.I: "Logs
//! older than 30 days under the log directory are purged on setup"),
//! grounded on the setup-time cleanup in
//! `original_source/opsiconfd/setup/__init__.py`.

use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

pub const MAX_LOG_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Removes every regular file directly under `log_dir` whose modification
/// time is older than `max_age`. Symlinks are left alone — they point at a
/// file that will be removed (or not) in its own right.
pub fn purge_old_logs(log_dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;

    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let age = match metadata.modified().and_then(|modified| now.duration_since(modified).map_err(std::io::Error::other)) {
            Ok(age) => age,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "could not determine log file age");
                continue;
            }
        };
        if age > max_age {
            debug!(path = %entry.path().display(), "purging expired log file");
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    #[test]
    fn purge_removes_only_files_older_than_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("fresh.log");
        fs::write(&fresh, "recent").unwrap();

        let removed = purge_old_logs(dir.path(), Duration::from_secs(0)).unwrap();
        assert_eq!(removed, 1);
        assert!(!fresh.exists());
    }

    #[test]
    fn purge_is_a_noop_on_a_missing_directory() {
        let removed = purge_old_logs(Path::new("/nonexistent/log/dir"), MAX_LOG_AGE).unwrap();
        assert_eq!(removed, 0);
    }
}
