//! Scan session bookkeeping
//!
//! Tracks how much of the source has been scanned and for how long. Holds no
//! scanning logic; the carver feeds it and reporting layers read snapshots.

use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ScanSession {
    total_bytes_scanned: u64,
    source_size: u64,
    started: Instant,
    finished: Option<Duration>,
}

impl ScanSession {
    /// Starts the clock. `source_size` of `None` is stored as 0 (unknown).
    pub fn new(source_size: Option<u64>) -> Self {
        Self {
            total_bytes_scanned: 0,
            source_size: source_size.unwrap_or(0),
            started: Instant::now(),
            finished: None,
        }
    }

    #[inline]
    pub fn record(&mut self, bytes: u64) {
        self.total_bytes_scanned += bytes;
    }

    /// Freezes `elapsed` at the current time.
    pub fn finish(&mut self) {
        if self.finished.is_none() {
            self.finished = Some(self.started.elapsed());
        }
    }

    #[inline]
    pub fn total_bytes_scanned(&self) -> u64 {
        self.total_bytes_scanned
    }

    #[inline]
    pub fn source_size(&self) -> u64 {
        self.source_size
    }

    pub fn elapsed(&self) -> Duration {
        self.finished.unwrap_or_else(|| self.started.elapsed())
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        ScanSnapshot {
            total_bytes_scanned: self.total_bytes_scanned,
            source_size: self.source_size,
            elapsed: self.elapsed(),
        }
    }
}

/// Read-only view of a [`ScanSession`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScanSnapshot {
    pub total_bytes_scanned: u64,
    pub source_size: u64,
    pub elapsed: Duration,
}

impl ScanSnapshot {
    /// Progress in percent, or `None` when the source size is unknown.
    pub fn percentage(&self) -> Option<f64> {
        if self.source_size == 0 {
            return None;
        }
        Some((self.total_bytes_scanned as f64 / self.source_size as f64 * 100.0).min(100.0))
    }

    pub fn bytes_per_second(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= f64::EPSILON {
            return 0;
        }
        (self.total_bytes_scanned as f64 / secs) as u64
    }

    /// Elapsed time as `hh:mm:ss`.
    pub fn elapsed_hms(&self) -> String {
        let secs = self.elapsed.as_secs();
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
    }
}
