//! Traffic accounting: bytes and messages per direction, with a per-type
//! inbound breakdown.
//!
//! The counters live on the service loop and are bumped from its thread
//! only, so plain integers suffice. [`TrafficCounters::snapshot_and_reset`]
//! hands one measurement period to a periodic stats dump.

use std::collections::HashMap;

/// Accumulated count and byte total for one message type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageTypeStats {
    /// Messages of this type seen.
    pub count: u64,
    /// Total bytes across them, headers included.
    pub total_bytes: u64,
}

/// Live counters for the current measurement period.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    bytes_sent: u64,
    bytes_received: u64,
    messages_sent: u64,
    messages_received: u64,
    per_type: HashMap<u16, MessageTypeStats>,
}

impl TrafficCounters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one outbound message of the given wire size.
    pub fn record_send(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.messages_sent += 1;
    }

    /// Record one inbound message of the given type and wire size.
    pub fn record_receive(&mut self, type_id: u16, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.messages_received += 1;
        let entry = self.per_type.entry(type_id).or_default();
        entry.count += 1;
        entry.total_bytes += bytes as u64;
    }

    /// Take the current period's totals and start a fresh one.
    pub fn snapshot_and_reset(&mut self) -> TrafficSnapshot {
        let snapshot = TrafficSnapshot {
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            per_type: std::mem::take(&mut self.per_type),
        };
        self.bytes_sent = 0;
        self.bytes_received = 0;
        self.messages_sent = 0;
        self.messages_received = 0;
        snapshot
    }
}

/// Point-in-time totals for one completed measurement period.
#[derive(Debug, Clone, Default)]
pub struct TrafficSnapshot {
    /// Wire bytes sent.
    pub bytes_sent: u64,
    /// Wire bytes received.
    pub bytes_received: u64,
    /// Messages sent.
    pub messages_sent: u64,
    /// Messages received.
    pub messages_received: u64,
    /// Inbound breakdown keyed by message type id.
    pub per_type: HashMap<u16, MessageTypeStats>,
}

impl TrafficSnapshot {
    /// Log the period's totals under the given label.
    pub fn log(&self, label: &str) {
        tracing::debug!(
            label,
            bytes_sent = self.bytes_sent,
            messages_sent = self.messages_sent,
            bytes_received = self.bytes_received,
            messages_received = self.messages_received,
            "traffic"
        );
        for (type_id, stats) in &self.per_type {
            tracing::trace!(
                label,
                type_id = format_args!("{type_id:#06x}"),
                count = stats.count,
                total_bytes = stats.total_bytes,
                "inbound by type"
            );
        }
    }
}
