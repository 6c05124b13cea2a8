//! Chunked signature carver
//!
//! Reads a [`ByteSource`] one chunk at a time and carves every byte range
//! that runs from a start marker through the next end marker. The last
//! `carry_len` bytes of each search window are kept in front of the next
//! chunk, so a marker split across two reads is still found.
//!
//! The carver has two modes. While `Scanning` it looks for the start marker
//! and opens a record plus a sink writer on the first hit. While `Extracting`
//! it streams bytes into that writer until the end marker shows up, then
//! seeks the source to the byte right after the marker and goes back to
//! `Scanning`. Start markers seen while extracting are ignored, so at most
//! one record is open at a time.

use crate::error::{CarveError, Result};
use crate::observer::{NoopObserver, ScanObserver};
use crate::session::{ScanSession, ScanSnapshot};
use crate::signatures::SignatureEntry;
use crate::sink::{ArtifactReceipt, ArtifactWriter, Sink};
use crate::source::{ByteSource, ChunkCapacity};
use crate::types::{Offset, RecoveredFile};
use serde::{Deserialize, Serialize};
use std::io;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation, checked once per chunk boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What [`Carver::run`] does when a sink fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkFailurePolicy {
    /// Stop the scan and return the error.
    #[default]
    Abort,
    /// Log the failure and keep scanning.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Scanned { bytes: usize },
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkFailure {
    pub id: u64,
    pub error: String,
}

/// Everything a finished (or stopped) scan produced.
#[derive(Debug, Clone, Serialize)]
pub struct CarveReport {
    pub extension: String,
    pub files: Vec<RecoveredFile>,
    pub receipts: Vec<ArtifactReceipt>,
    pub failures: Vec<SinkFailure>,
    pub session: ScanSnapshot,
    pub cancelled: bool,
}

impl CarveReport {
    pub fn complete_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_complete()).count()
    }

    pub fn truncated_count(&self) -> usize {
        self.files.iter().filter(|f| f.truncated).count()
    }
}

struct Extraction<W> {
    file: RecoveredFile,
    writer: W,
    written_through: Offset,
}

enum CarveMode<W> {
    Scanning,
    Extracting(Extraction<W>),
}

pub struct Carver<K: Sink> {
    signature: SignatureEntry,
    capacity: ChunkCapacity,
    sink: K,
    observer: Box<dyn ScanObserver>,
    policy: SinkFailurePolicy,
    mode: CarveMode<K::Writer>,
    /// Tail carry (`carry` bytes) followed by the chunk being scanned.
    window: Vec<u8>,
    carry: usize,
    /// No match may begin before this absolute offset.
    search_from: Offset,
    /// End of the source range already counted in the session.
    high_water: Offset,
    next_id: u64,
    files: Vec<RecoveredFile>,
    receipts: Vec<ArtifactReceipt>,
    failures: Vec<SinkFailure>,
    session: ScanSession,
    started: bool,
    finished: bool,
    cancelled: bool,
}

impl<K: Sink> Carver<K> {
    pub fn new(signature: SignatureEntry, capacity: ChunkCapacity, sink: K) -> Self {
        Self {
            signature,
            capacity,
            sink,
            observer: Box::new(NoopObserver),
            policy: SinkFailurePolicy::default(),
            mode: CarveMode::Scanning,
            window: Vec::with_capacity(capacity.get()),
            carry: 0,
            search_from: 0,
            high_water: 0,
            next_id: 0,
            files: Vec::new(),
            receipts: Vec::new(),
            failures: Vec::new(),
            session: ScanSession::new(None),
            started: false,
            finished: false,
            cancelled: false,
        }
    }

    pub fn with_observer(mut self, observer: impl ScanObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn with_failure_policy(mut self, policy: SinkFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn signature(&self) -> &SignatureEntry {
        &self.signature
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    /// Finalized records in discovery order.
    pub fn recovered(&self) -> &[RecoveredFile] {
        &self.files
    }

    /// The record currently being extracted, if any.
    pub fn open_file(&self) -> Option<&RecoveredFile> {
        match &self.mode {
            CarveMode::Extracting(ex) => Some(&ex.file),
            CarveMode::Scanning => None,
        }
    }

    pub fn is_extracting(&self) -> bool {
        matches!(self.mode, CarveMode::Extracting(_))
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    /// Drives the scan until the source is exhausted or `cancel` is set.
    ///
    /// On error the open record (if any) is finalized as truncated before
    /// returning, so [`Carver::recovered`] still lists it.
    pub fn run<S: ByteSource>(&mut self, source: &mut S, cancel: &CancelFlag) -> Result<CarveReport> {
        tracing::info!(
            extension = self.signature.extension(),
            capacity = self.capacity.get(),
            "Starting carve"
        );

        loop {
            if cancel.is_cancelled() {
                tracing::warn!("Scan cancelled at offset 0x{:X}", source.position());
                self.cancelled = true;
                break;
            }

            match self.process_next_chunk(source) {
                Ok(ChunkOutcome::Exhausted) => break,
                Ok(ChunkOutcome::Scanned { .. }) => {}
                Err(CarveError::Sink { id, source: err })
                    if self.policy == SinkFailurePolicy::Skip =>
                {
                    tracing::warn!(id, "Skipping recovered file after sink error: {}", err);
                }
                Err(e) => {
                    if let Err(close_err) = self.finish() {
                        tracing::warn!("Failed to close open file while aborting: {}", close_err);
                    }
                    return Err(e);
                }
            }
        }

        match self.finish() {
            Err(CarveError::Sink { id, source: err }) if self.policy == SinkFailurePolicy::Skip => {
                tracing::warn!(id, "Skipping recovered file after sink error: {}", err);
            }
            other => other?,
        }

        let report = self.report();
        tracing::info!(
            files = report.files.len(),
            truncated = report.truncated_count(),
            scanned = report.session.total_bytes_scanned,
            "Carve finished in {}",
            report.session.elapsed_hms()
        );
        Ok(report)
    }

    /// Reads and scans one chunk.
    ///
    /// A sink failure is returned as [`CarveError::Sink`] after the affected
    /// record has been finalized as truncated and the source rewound to just
    /// past its start marker. Calling this again resumes scanning from there.
    pub fn process_next_chunk<S: ByteSource>(&mut self, source: &mut S) -> Result<ChunkOutcome> {
        if self.finished {
            return Ok(ChunkOutcome::Exhausted);
        }
        if !self.started {
            self.started = true;
            self.session = ScanSession::new(source.size_hint());
            self.high_water = source.position();
            self.search_from = source.position();
        }

        let chunk_offset = source.position();
        self.window.resize(self.carry + self.capacity.get(), 0);

        let n = match source.read_chunk(&mut self.window[self.carry..]) {
            Ok(n) => n,
            Err(e) => {
                self.window.truncate(self.carry);
                return Err(e);
            }
        };
        self.window.truncate(self.carry + n);

        if n == 0 {
            self.finish()?;
            return Ok(ChunkOutcome::Exhausted);
        }

        let chunk_end = chunk_offset + n as u64;
        if chunk_end > self.high_water {
            self.session.record(chunk_end - chunk_offset.max(self.high_water));
            self.high_water = chunk_end;
        }

        let base = chunk_offset - self.carry as u64;
        let scanned = self.scan_window(source, base);
        self.observer.on_progress(&self.session.snapshot());
        scanned?;

        Ok(ChunkOutcome::Scanned { bytes: n })
    }

    /// Finalizes any open record as truncated and stops the session.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.session.finish();

        if let CarveMode::Extracting(ex) = mem::replace(&mut self.mode, CarveMode::Scanning) {
            tracing::warn!(
                id = ex.file.id,
                "No end marker for file at 0x{:X}; keeping {} bytes as truncated",
                ex.file.start_offset,
                ex.file.bytes_written
            );
            self.close_extraction(ex)?;
        }
        Ok(())
    }

    pub fn report(&self) -> CarveReport {
        CarveReport {
            extension: self.signature.extension().to_string(),
            files: self.files.clone(),
            receipts: self.receipts.clone(),
            failures: self.failures.clone(),
            session: self.session.snapshot(),
            cancelled: self.cancelled,
        }
    }

    fn scan_window<S: ByteSource>(&mut self, source: &mut S, base: Offset) -> Result<()> {
        loop {
            let floor = (self.search_from.saturating_sub(base) as usize).min(self.window.len());

            if !self.is_extracting() {
                let Some(rel) = self.signature.find_start(&self.window[floor..]) else {
                    break;
                };
                let start = base + (floor + rel) as u64;
                self.open_extraction(source, start)?;
                continue;
            }

            let end_hit = self.signature.find_end(&self.window[floor..]);
            let write_to = match end_hit {
                Some(rel) => floor + rel + self.signature.end_marker().len(),
                None => self.window.len(),
            };

            if let CarveMode::Extracting(ex) = &mut self.mode {
                let from = (ex.written_through - base) as usize;
                if let Err(e) = ex.writer.write_all(&self.window[from..write_to]) {
                    return Err(self.fail_extraction(source, e));
                }
                ex.file.bytes_written += (write_to - from) as u64;
                ex.written_through = base + write_to as u64;
            }

            if end_hit.is_none() {
                break;
            }

            let resume_at = base + write_to as u64;
            let closed = self.complete_extraction(resume_at - 1);

            // Resume exactly one byte past the end marker; whatever followed
            // it in this chunk is read again from there.
            self.search_from = resume_at;
            self.window.clear();
            self.carry = 0;
            source.seek_absolute(resume_at)?;
            tracing::debug!("Resuming scan at 0x{:X}", resume_at);

            return closed;
        }

        let keep = self.signature.carry_len().min(self.window.len());
        let len = self.window.len();
        self.window.copy_within(len - keep.., 0);
        self.window.truncate(keep);
        self.carry = keep;
        Ok(())
    }

    fn open_extraction<S: ByteSource>(&mut self, source: &mut S, start: Offset) -> Result<()> {
        let id = self.next_id;
        self.next_id += 1;
        self.search_from = start + self.signature.start_marker().len() as u64;

        let file = RecoveredFile::open(id, self.signature.extension(), start);
        self.observer.on_file_opened(&file);

        match self.sink.open(&file) {
            Ok(writer) => {
                self.mode = CarveMode::Extracting(Extraction {
                    file,
                    writer,
                    written_through: start,
                });
                Ok(())
            }
            Err(e) => {
                self.record_failure(file, &e);
                Err(self.rewind(source, id, e))
            }
        }
    }

    fn complete_extraction(&mut self, end_offset: Offset) -> Result<()> {
        let CarveMode::Extracting(mut ex) = mem::replace(&mut self.mode, CarveMode::Scanning)
        else {
            return Ok(());
        };
        ex.file.end_offset = Some(end_offset);
        ex.file.truncated = false;
        self.close_extraction(ex)
    }

    fn close_extraction(&mut self, ex: Extraction<K::Writer>) -> Result<()> {
        let Extraction { file, writer, .. } = ex;
        match writer.finish(&file) {
            Ok(receipt) => {
                self.observer.on_file_closed(&file, Some(&receipt));
                self.receipts.push(receipt);
                self.files.push(file);
                Ok(())
            }
            Err(e) => {
                let id = file.id;
                self.record_failure(file, &e);
                Err(CarveError::Sink { id, source: e })
            }
        }
    }

    /// Handles a write error on the open extraction: the writer is released,
    /// the record is kept as truncated and scanning restarts after its start
    /// marker.
    fn fail_extraction<S: ByteSource>(&mut self, source: &mut S, err: io::Error) -> CarveError {
        let CarveMode::Extracting(ex) = mem::replace(&mut self.mode, CarveMode::Scanning) else {
            return CarveError::Io(err);
        };
        let Extraction { mut file, writer, .. } = ex;
        drop(writer);

        let id = file.id;
        file.end_offset = None;
        file.truncated = true;
        self.record_failure(file, &err);
        self.rewind(source, id, err)
    }

    fn record_failure(&mut self, file: RecoveredFile, err: &io::Error) {
        tracing::warn!(id = file.id, "Sink failed for file at 0x{:X}: {}", file.start_offset, err);
        self.observer.on_file_closed(&file, None);
        self.failures.push(SinkFailure {
            id: file.id,
            error: err.to_string(),
        });
        self.files.push(file);
    }

    fn rewind<S: ByteSource>(&mut self, source: &mut S, id: u64, err: io::Error) -> CarveError {
        self.window.clear();
        self.carry = 0;
        if let Err(seek_err) = source.seek_absolute(self.search_from) {
            return seek_err;
        }
        CarveError::Sink { id, source: err }
    }
}
