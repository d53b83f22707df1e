//! # Overload Shedding
//!
//! Spec §4.B/§7/scenario S6: an operator (or the arbiter's own RSS/queue
//! watchdog) can mark the service overloaded for a fixed window. While
//! overloaded, requests from non-exempt addresses are shed with a 503 and
//! `Retry-After`; WebSocket upgrades are closed with code 1013 instead.
//! `core-session::SessionManager` has no notion of this — it's transient
//! process state, not anything that needs to survive a restart or be shared
//! with another worker, so it lives here as a small atomic.

use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Shared overload flag. One instance per worker process; cheap to clone
/// (an `Arc` around the atomic), consulted on every request.
#[derive(Clone, Default)]
pub struct OverloadState {
    /// Unix timestamp (seconds) the overload window ends, or `0` if not
    /// currently overloaded.
    until: std::sync::Arc<AtomicI64>,
}

impl OverloadState {
    pub fn new() -> Self {
        Self { until: std::sync::Arc::new(AtomicI64::new(0)) }
    }

    /// Marks the service overloaded for `seconds` starting now.
    pub fn set_overload(&self, seconds: u64) {
        let until = now_secs() + seconds as i64;
        self.until.store(until, Ordering::SeqCst);
    }

    /// Clears an active overload window early.
    pub fn clear(&self) {
        self.until.store(0, Ordering::SeqCst);
    }

    /// Seconds remaining in the overload window, or `None` if not currently
    /// overloaded.
    pub fn retry_after_secs(&self) -> Option<u64> {
        let until = self.until.load(Ordering::SeqCst);
        let remaining = until - now_secs();
        if remaining > 0 {
            Some(remaining as u64)
        } else {
            None
        }
    }
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// `true` if `addr` bypasses overload shedding (localhost, always exempt so
/// an operator can still reach `status`/CLI paths during a shed window).
pub fn is_overload_exempt(addr: IpAddr) -> bool {
    addr.is_loopback()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_overloaded_by_default() {
        let state = OverloadState::new();
        assert!(state.retry_after_secs().is_none());
    }

    #[test]
    fn set_overload_reports_a_positive_retry_after() {
        let state = OverloadState::new();
        state.set_overload(30);
        let remaining = state.retry_after_secs().unwrap();
        assert!(remaining > 0 && remaining <= 30);
    }

    #[test]
    fn clear_ends_the_window_immediately() {
        let state = OverloadState::new();
        state.set_overload(30);
        state.clear();
        assert!(state.retry_after_secs().is_none());
    }

    #[test]
    fn loopback_addresses_are_exempt() {
        assert!(is_overload_exempt("127.0.0.1".parse().unwrap()));
        assert!(!is_overload_exempt("10.0.0.5".parse().unwrap()));
    }
}
