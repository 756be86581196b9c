// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-slave request statistics.
//!
//! All counters are lock-free atomics updated from the protocol-engine hot
//! path. Readers always see a consistent value per field, but the tuple is
//! not snapshot-atomic across fields; callers must not assume cross-field
//! consistency.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

// =============================================================================
// SlaveStats
// =============================================================================

/// Monotonic request counters for one slave.
#[derive(Debug, Default)]
pub struct SlaveStats {
    /// Completed requests (normal responses and exception responses).
    requests: AtomicU64,

    /// Exception responses plus silently dropped responses.
    errors: AtomicU64,

    /// Wire bytes consumed (MBAP header + PDU).
    bytes_in: AtomicU64,

    /// Wire bytes emitted (response ADUs).
    bytes_out: AtomicU64,

    /// Slave start time, epoch milliseconds; 0 while never started.
    start_time_ms: AtomicI64,

    /// Most recent request arrival, epoch milliseconds; 0 before the first.
    last_request_ms: AtomicI64,
}

impl SlaveStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the slave start time.
    pub fn mark_started(&self) {
        self.start_time_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Records one completed request with wire-accurate byte counts.
    pub fn record_request(&self, bytes_in: u64, bytes_out: u64, is_error: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
        if is_error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.last_request_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Records a request whose response was silently dropped.
    ///
    /// The request never completes, so only the error counter moves.
    pub fn record_dropped(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.last_request_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Completed request count.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Error count (exceptions plus drops).
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Total bytes received.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    /// Total bytes sent.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    /// Start time, if the slave has ever started.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        millis_to_datetime(self.start_time_ms.load(Ordering::Relaxed))
    }

    /// Arrival time of the most recent request.
    pub fn last_request_time(&self) -> Option<DateTime<Utc>> {
        millis_to_datetime(self.last_request_ms.load(Ordering::Relaxed))
    }

    /// Copies the counters into a serializable snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests(),
            errors: self.errors(),
            bytes_in: self.bytes_in(),
            bytes_out: self.bytes_out(),
            start_time: self.start_time(),
            last_request_time: self.last_request_time(),
        }
    }
}

fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    if millis == 0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis).single()
}

// =============================================================================
// StatsSnapshot
// =============================================================================

/// Point-in-time copy of one slave's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Completed requests.
    pub requests: u64,

    /// Exceptions plus dropped responses.
    pub errors: u64,

    /// Total bytes received.
    pub bytes_in: u64,

    /// Total bytes sent.
    pub bytes_out: u64,

    /// Slave start time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// Most recent request arrival.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_request_time: Option<DateTime<Utc>>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request() {
        let stats = SlaveStats::new();
        stats.record_request(12, 11, false);
        stats.record_request(12, 9, true);

        assert_eq!(stats.requests(), 2);
        assert_eq!(stats.errors(), 1);
        assert_eq!(stats.bytes_in(), 24);
        assert_eq!(stats.bytes_out(), 20);
        assert!(stats.last_request_time().is_some());
    }

    #[test]
    fn test_record_dropped_only_counts_error() {
        let stats = SlaveStats::new();
        stats.record_dropped();

        assert_eq!(stats.requests(), 0);
        assert_eq!(stats.errors(), 1);
        assert_eq!(stats.bytes_in(), 0);
        assert_eq!(stats.bytes_out(), 0);
    }

    #[test]
    fn test_start_time_unset_until_marked() {
        let stats = SlaveStats::new();
        assert!(stats.start_time().is_none());
        stats.mark_started();
        assert!(stats.start_time().is_some());
    }

    #[test]
    fn test_snapshot_copies_counters() {
        let stats = SlaveStats::new();
        stats.record_request(8, 8, false);
        let snapshot = stats.snapshot();

        assert_eq!(snapshot.requests, 1);
        assert_eq!(snapshot.errors, 0);
        assert_eq!(snapshot.bytes_in, 8);
        assert_eq!(snapshot.bytes_out, 8);
    }
}
