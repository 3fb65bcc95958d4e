//! TURN service counters
//!
//! One mutex guards the whole counter block so a snapshot is always
//! internally consistent: `active_allocations` equals successful auth
//! invocations minus releases at any observation point.

use std::sync::Mutex;

use serde::Serialize;

/// Point-in-time copy of the counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TurnStatsSnapshot {
    pub active_allocations: u64,
    pub total_allocations: u64,
    pub bytes_transferred: u64,
    pub packets_transferred: u64,
    pub connections: u64,
}

/// Shared counter block, updated from the auth hook and the
/// allocation-release channel.
#[derive(Debug, Default)]
pub struct TurnStats {
    inner: Mutex<TurnStatsSnapshot>,
}

impl TurnStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client authenticated: one more live allocation.
    pub fn record_auth_success(&self) {
        let mut st = self.inner.lock().expect("turn stats poisoned");
        st.active_allocations += 1;
        st.total_allocations += 1;
        st.connections += 1;
    }

    /// An allocation was released, carrying its relayed byte count.
    pub fn record_release(&self, relayed_bytes: u64) {
        let mut st = self.inner.lock().expect("turn stats poisoned");
        st.active_allocations = st.active_allocations.saturating_sub(1);
        st.bytes_transferred += relayed_bytes;
    }

    /// Relay traffic observed outside the allocation lifecycle.
    pub fn record_traffic(&self, bytes: u64, packets: u64) {
        let mut st = self.inner.lock().expect("turn stats poisoned");
        st.bytes_transferred += bytes;
        st.packets_transferred += packets;
    }

    pub fn snapshot(&self) -> TurnStatsSnapshot {
        *self.inner.lock().expect("turn stats poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_tracks_auth_minus_release() {
        let stats = TurnStats::new();
        stats.record_auth_success();
        stats.record_auth_success();
        stats.record_auth_success();
        stats.record_release(1024);

        let snap = stats.snapshot();
        assert_eq!(snap.active_allocations, 2);
        assert_eq!(snap.total_allocations, 3);
        assert_eq!(snap.connections, 3);
        assert_eq!(snap.bytes_transferred, 1024);
    }

    #[test]
    fn release_never_underflows() {
        let stats = TurnStats::new();
        stats.record_release(0);
        assert_eq!(stats.snapshot().active_allocations, 0);
    }

    #[test]
    fn traffic_accumulates() {
        let stats = TurnStats::new();
        stats.record_traffic(512, 4);
        stats.record_traffic(512, 4);
        let snap = stats.snapshot();
        assert_eq!(snap.bytes_transferred, 1024);
        assert_eq!(snap.packets_transferred, 8);
    }
}
