use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use serde::{Serialize, Deserialize};

/// Pipeline counters shared by the producer and all workers
#[derive(Debug, Default)]
pub struct PipelineStats {
    batches_enqueued: AtomicU64,
    batches_written: AtomicU64,
    documents_written: AtomicU64,
    retries: AtomicU64,
    throttle_waits: AtomicU64,
    throttle_micros: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self) {
        self.batches_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_written(&self, documents: usize) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.documents_written.fetch_add(documents as u64, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttle(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        self.throttle_waits.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(delay.as_micros()).unwrap_or(u64::MAX);
        // saturates instead of wrapping on an unbounded backoff
        let _ = self
            .throttle_micros
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |total| Some(total.saturating_add(micros)));
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches_enqueued: self.batches_enqueued.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            documents_written: self.documents_written.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            throttle_waits: self.throttle_waits.load(Ordering::Relaxed),
            throttle_secs: self.throttle_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub batches_enqueued: u64,
    pub batches_written: u64,
    pub documents_written: u64,
    pub retries: u64,
    pub throttle_waits: u64,
    pub throttle_secs: f64,
}
