//! Engine statistics
//!
//! Cheap atomic counters recorded on the I/O path, exposed as a
//! serializable snapshot for monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Statistics for the I/O engine.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Read exchanges issued to storage targets
    pub remote_reads: AtomicU64,

    /// Write exchanges issued to storage targets
    pub remote_writes: AtomicU64,

    /// Bytes returned to callers by successful reads
    pub bytes_read: AtomicU64,

    /// Bytes accepted from callers by successful writes
    pub bytes_written: AtomicU64,

    /// Stripe-set rounds started
    pub rounds_started: AtomicU64,

    /// Communication retries performed (backoff rounds)
    pub comm_retries: AtomicU64,

    /// Mirror failovers (replica switches)
    pub mirror_failovers: AtomicU64,

    /// Calls that ended with an interrupted outcome
    pub calls_cancelled: AtomicU64,
}

impl EngineStats {
    /// Record a read exchange handed to a target.
    pub fn record_remote_read(&self) {
        self.remote_reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a write exchange handed to a target.
    pub fn record_remote_write(&self) {
        self.remote_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record bytes delivered by a completed read call.
    pub fn record_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record bytes accepted by a completed write call.
    pub fn record_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record the start of a stripe-set round.
    pub fn record_round(&self) {
        self.rounds_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one retry backoff round.
    pub fn record_retry(&self) {
        self.comm_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a switch to the buddy replica.
    pub fn record_failover(&self) {
        self.mirror_failovers.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a call that ended interrupted.
    pub fn record_cancelled(&self) {
        self.calls_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            remote_reads: self.remote_reads.load(Ordering::Relaxed),
            remote_writes: self.remote_writes.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            rounds_started: self.rounds_started.load(Ordering::Relaxed),
            comm_retries: self.comm_retries.load(Ordering::Relaxed),
            mirror_failovers: self.mirror_failovers.load(Ordering::Relaxed),
            calls_cancelled: self.calls_cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of engine statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub remote_reads: u64,
    pub remote_writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub rounds_started: u64,
    pub comm_retries: u64,
    pub mirror_failovers: u64,
    pub calls_cancelled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_recording() {
        let stats = EngineStats::default();

        stats.record_remote_read();
        stats.record_remote_read();
        stats.record_remote_write();
        stats.record_bytes_read(4096);
        stats.record_bytes_written(512);
        stats.record_round();
        stats.record_retry();
        stats.record_failover();
        stats.record_cancelled();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.remote_reads, 2);
        assert_eq!(snapshot.remote_writes, 1);
        assert_eq!(snapshot.bytes_read, 4096);
        assert_eq!(snapshot.bytes_written, 512);
        assert_eq!(snapshot.rounds_started, 1);
        assert_eq!(snapshot.comm_retries, 1);
        assert_eq!(snapshot.mirror_failovers, 1);
        assert_eq!(snapshot.calls_cancelled, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = EngineStats::default();
        stats.record_remote_read();

        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        let back: EngineStatsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.remote_reads, 1);
    }
}
