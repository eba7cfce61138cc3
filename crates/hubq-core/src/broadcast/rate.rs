//! Transfer rate and ETA derived from successive progress samples.

use std::time::Instant;

/// Weight of the newest instantaneous rate in the moving average.
const SMOOTHING: f64 = 0.3;

/// Snapshot of download progress for one job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressStats {
    pub bytes_done: u64,
    pub total_bytes: Option<u64>,
    /// Smoothed rate; `None` until two samples have been seen.
    pub bytes_per_sec: Option<f64>,
}

impl ProgressStats {
    /// Estimated seconds remaining (None if total or rate is unknown).
    pub fn eta_secs(&self) -> Option<u64> {
        let total = self.total_bytes?;
        let remaining = total.saturating_sub(self.bytes_done);
        if remaining == 0 {
            return Some(0);
        }
        let rate = self.bytes_per_sec?;
        if rate <= 0.0 {
            return None;
        }
        Some((remaining as f64 / rate).ceil() as u64)
    }
}

/// Per-job rate tracker (exponential moving average of byte deltas).
#[derive(Debug, Clone)]
pub struct RateTracker {
    last_at: Instant,
    last_bytes: u64,
    rate: Option<f64>,
}

impl RateTracker {
    pub fn new(bytes: u64, at: Instant) -> Self {
        Self {
            last_at: at,
            last_bytes: bytes,
            rate: None,
        }
    }

    pub fn sample(&mut self, bytes: u64, at: Instant) {
        let elapsed = at.saturating_duration_since(self.last_at).as_secs_f64();
        if bytes < self.last_bytes {
            // Restarted from scratch.
            *self = Self::new(bytes, at);
            return;
        }
        if elapsed <= 0.0 {
            return;
        }
        let instant = (bytes - self.last_bytes) as f64 / elapsed;
        self.rate = Some(match self.rate {
            Some(prev) => prev + SMOOTHING * (instant - prev),
            None => instant,
        });
        self.last_at = at;
        self.last_bytes = bytes;
    }

    pub fn bytes_per_sec(&self) -> Option<f64> {
        self.rate
    }
}
