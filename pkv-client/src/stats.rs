//! # Connection Counters
//!
//! Lightweight counters describing one connection's traffic and recovery
//! history.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Atomic counters aggregate events cheaply.
//! 2. **Zero-Cost Access**: Snapshots are plain structs copied out.
//!
//! `Ordering::Relaxed` is sufficient: no reader needs cross-field ordering.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Commands encoded for a socket, counted before the write completes
    /// (replays count again).
    pub commands_sent: u64,
    /// Replies matched to a waiting caller.
    pub replies: u64,
    /// Replies that arrived after their caller timed out or cancelled.
    pub late_replies: u64,
    /// Push frames received.
    pub pushes: u64,
    /// Successful connects after the first one.
    pub reconnects: u64,
    /// Entries resent after a reconnect.
    pub replayed: u64,
    /// Entries failed by the replay policy.
    pub replay_failures: u64,
    /// Commands accepted but not yet settled.
    pub in_flight: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Stats {
    commands_sent: AtomicU64,
    replies: AtomicU64,
    late_replies: AtomicU64,
    pushes: AtomicU64,
    connects: AtomicU64,
    replayed: AtomicU64,
    replay_failures: AtomicU64,
}

impl Stats {
    pub(crate) fn record_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reply(&self) {
        self.replies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_late_reply(&self) {
        self.late_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_push(&self) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replay(&self, replayed: u64, failed: u64) {
        self.replayed.fetch_add(replayed, Ordering::Relaxed);
        self.replay_failures.fetch_add(failed, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, in_flight: u64) -> StatsSnapshot {
        StatsSnapshot {
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            replies: self.replies.load(Ordering::Relaxed),
            late_replies: self.late_replies.load(Ordering::Relaxed),
            pushes: self.pushes.load(Ordering::Relaxed),
            reconnects: self.connects.load(Ordering::Relaxed).saturating_sub(1),
            replayed: self.replayed.load(Ordering::Relaxed),
            replay_failures: self.replay_failures.load(Ordering::Relaxed),
            in_flight,
        }
    }
}
