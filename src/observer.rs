//! Scan observers
//!
//! The carver reports progress and found events through [`ScanObserver`]
//! instead of printing. Callers wire it to a progress bar, to logging, or to
//! nothing at all.

use crate::session::ScanSnapshot;
use crate::sink::ArtifactReceipt;
use crate::types::RecoveredFile;
use humansize::{BINARY, format_size};

pub trait ScanObserver {
    /// Called once per chunk, after the session has been updated.
    fn on_progress(&mut self, _snapshot: &ScanSnapshot) {}

    /// A start marker matched and a new record was opened.
    fn on_file_opened(&mut self, _file: &RecoveredFile) {}

    /// A record was finalized. `receipt` is `None` when the sink failed.
    fn on_file_closed(&mut self, _file: &RecoveredFile, _receipt: Option<&ArtifactReceipt>) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ScanObserver for NoopObserver {}

/// Forwards events to `tracing`, with a progress line every `interval`
/// scanned bytes.
#[derive(Debug, Clone)]
pub struct LogObserver {
    interval: u64,
    next_report: u64,
}

impl LogObserver {
    pub fn new(interval: u64) -> Self {
        let interval = interval.max(1);
        Self {
            interval,
            next_report: interval,
        }
    }
}

impl ScanObserver for LogObserver {
    fn on_progress(&mut self, snapshot: &ScanSnapshot) {
        if snapshot.total_bytes_scanned < self.next_report {
            return;
        }
        while self.next_report <= snapshot.total_bytes_scanned {
            self.next_report += self.interval;
        }
        tracing::info!(
            elapsed = %snapshot.elapsed_hms(),
            "Scanned {}",
            format_size(snapshot.total_bytes_scanned, BINARY)
        );
    }

    fn on_file_opened(&mut self, file: &RecoveredFile) {
        tracing::info!(
            id = file.id,
            "Found {} at location 0x{:X}",
            file.extension.to_uppercase(),
            file.start_offset
        );
    }

    fn on_file_closed(&mut self, file: &RecoveredFile, receipt: Option<&ArtifactReceipt>) {
        match receipt.and_then(|r| r.path.as_ref()) {
            Some(path) => tracing::info!(
                id = file.id,
                truncated = file.truncated,
                "Wrote {} to {}",
                file.extension.to_uppercase(),
                path.display()
            ),
            None => tracing::info!(
                id = file.id,
                truncated = file.truncated,
                bytes = file.bytes_written,
                "Closed {} record",
                file.extension.to_uppercase()
            ),
        }
    }
}
