use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Per-channel counters snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub sent: u64,
    pub send_failures: u64,
    pub received: u64,
    /// Listener invocations that completed without error
    pub delivered: u64,
    pub decode_failures: u64,
    pub listener_failures: u64,
    pub active_agents: usize,
    /// Milliseconds since epoch of the last inbound payload
    pub last_received_ms: Option<i64>,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    sent: AtomicU64,
    send_failures: AtomicU64,
    received: AtomicU64,
    delivered: AtomicU64,
    decode_failures: AtomicU64,
    listener_failures: AtomicU64,
    // 0 = nothing received yet
    last_received_ms: AtomicI64,
}

impl StatsCounters {
    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.last_received_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self, delivered: u64, failed: u64) {
        self.delivered.fetch_add(delivered, Ordering::Relaxed);
        self.listener_failures.fetch_add(failed, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, active_agents: usize) -> ChannelStats {
        let last = self.last_received_ms.load(Ordering::Relaxed);
        ChannelStats {
            sent: self.sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            active_agents,
            last_received_ms: (last != 0).then_some(last),
        }
    }
}
