//! Streaming counters shared between the controller and the fill thread.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated by the fill thread.
#[derive(Debug, Default)]
pub struct StreamCounters {
    sessions: AtomicU64,
    producer_calls: AtomicU64,
    refills: AtomicU64,
    underrun_recoveries: AtomicU64,
    iterations: AtomicU64,
}

impl StreamCounters {
    pub fn session_started(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn producer_called(&self) {
        self.producer_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn producer_called_times(&self, calls: u64) {
        self.producer_calls.fetch_add(calls, Ordering::Relaxed);
    }

    pub fn refilled(&self) {
        self.refills.fetch_add(1, Ordering::Relaxed);
    }

    pub fn underrun_recovered(&self) {
        self.underrun_recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StreamStats {
        StreamStats {
            sessions: self.sessions.load(Ordering::Relaxed),
            producer_calls: self.producer_calls.load(Ordering::Relaxed),
            refills: self.refills.load(Ordering::Relaxed),
            underrun_recoveries: self.underrun_recoveries.load(Ordering::Relaxed),
            iterations: self.iterations.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`StreamCounters`]. Totals cover the engine's whole life.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    /// Sessions started.
    pub sessions: u64,
    /// Producer invocations, priming included.
    pub producer_calls: u64,
    /// Buffers refilled and requeued by the fill thread.
    pub refills: u64,
    /// Times playback was restarted after the device ran dry.
    pub underrun_recoveries: u64,
    /// Fill loop iterations.
    pub iterations: u64,
}
