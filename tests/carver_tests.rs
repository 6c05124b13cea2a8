//! Carver tests
//!
//! Chunk-boundary behavior, resume semantics, truncation, cancellation, and
//! source and sink failures, all against in-memory sources and sinks.

use chisel::{
    ArtifactReceipt, ArtifactWriter, ByteSource, CancelFlag, CarveError, CarveReport, Carver,
    ChunkCapacity, MemorySink, MemorySource, RecoveredFile, ScanObserver, SignatureDirectory,
    SignatureEntry, Sink, SinkFailurePolicy,
};
use proptest::collection::vec;
use proptest::prelude::*;
use rstest::*;
use std::io;

const PNG_START: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const PNG_END: &[u8] = &[0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82];

fn png() -> SignatureEntry {
    SignatureDirectory::with_defaults().lookup("png").unwrap().clone()
}

fn arrows() -> SignatureEntry {
    SignatureEntry::new("bin", b"<<".to_vec(), b">>>".to_vec()).unwrap()
}

fn carve(signature: SignatureEntry, data: &[u8], capacity: usize) -> (CarveReport, MemorySink) {
    let sink = MemorySink::new();
    let mut carver = Carver::new(signature, ChunkCapacity::new(capacity).unwrap(), sink.clone());
    let mut source = MemorySource::new(data.to_vec());
    let report = carver.run(&mut source, &CancelFlag::new()).unwrap();
    (report, sink)
}

/// Filler drawn from `0x00..0x40` never contains a PNG marker byte sequence.
fn png_stream(prefix: &[u8], payload: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut data = prefix.to_vec();
    data.extend_from_slice(PNG_START);
    data.extend_from_slice(payload);
    data.extend_from_slice(PNG_END);
    data.extend_from_slice(suffix);
    data
}

// ============================================================================
// Concrete scenario
// ============================================================================

#[test]
fn test_png_scenario_capacity_16() {
    let payload: Vec<u8> = (0..100u8).map(|b| b % 0x40).collect();
    let data = png_stream(&[0u8; 10], &payload, &[0u8; 5]);
    assert_eq!(data.len(), 131);

    let (report, sink) = carve(png(), &data, 16);

    assert_eq!(report.files.len(), 1);
    let file = &report.files[0];
    assert_eq!(file.id, 0);
    assert_eq!(file.start_offset, 10);
    assert_eq!(file.end_offset, Some(125));
    assert!(!file.truncated);
    assert_eq!(file.bytes_written, 116);

    let written = sink.artifact(0).unwrap();
    assert_eq!(written.len(), 116);
    assert_eq!(&written[..], &data[10..126]);
    assert_eq!(report.session.total_bytes_scanned, 131);
}

// ============================================================================
// Boundary invariance
// ============================================================================

#[test]
fn test_markers_split_at_every_point() {
    let payload = b"0123456789abcdef0123";
    let capacity = 16;

    // Shifting the prefix walks both markers across every split position of
    // a 16-byte chunk boundary.
    for prefix_len in 0..(2 * capacity) {
        let prefix = vec![b'.'; prefix_len];
        let data = png_stream(&prefix, payload, b"..");
        let (report, sink) = carve(png(), &data, capacity);

        assert_eq!(report.files.len(), 1, "prefix {}", prefix_len);
        let file = &report.files[0];
        assert_eq!(file.start_offset, prefix_len as u64);
        assert_eq!(
            file.end_offset,
            Some((prefix_len + PNG_START.len() + payload.len() + PNG_END.len() - 1) as u64)
        );
        assert!(!file.truncated);
        assert_eq!(
            sink.artifact(0).unwrap(),
            &data[prefix_len..prefix_len + 36],
            "prefix {}",
            prefix_len
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_every_capacity_matches_whole_stream(
        prefix in vec(0u8..0x40, 0..40),
        payload in vec(0u8..0x40, 0..60),
        suffix in vec(0u8..0x40, 0..20),
    ) {
        let data = png_stream(&prefix, &payload, &suffix);
        let (whole, whole_sink) = carve(png(), &data, data.len());

        prop_assert_eq!(whole.files.len(), 1);
        prop_assert_eq!(whole.files[0].start_offset, prefix.len() as u64);

        for capacity in 1..=data.len() {
            let (report, sink) = carve(png(), &data, capacity);
            prop_assert_eq!(&report.files, &whole.files, "capacity {}", capacity);
            prop_assert_eq!(sink.artifacts(), whole_sink.artifacts(), "capacity {}", capacity);
            prop_assert_eq!(report.session.total_bytes_scanned, data.len() as u64);
        }
    }

    #[test]
    fn prop_sequential_ids(
        gaps in vec(vec(0u8..0x40, 0..12), 1..6),
        capacity in 1usize..48,
    ) {
        let mut data = Vec::new();
        let mut expected_starts = Vec::new();
        for (i, gap) in gaps.iter().enumerate() {
            data.extend_from_slice(gap);
            expected_starts.push(data.len() as u64);
            data.extend_from_slice(PNG_START);
            data.push(i as u8);
            data.extend_from_slice(PNG_END);
        }

        let (report, _) = carve(png(), &data, capacity);

        prop_assert_eq!(report.files.len(), gaps.len());
        for (i, file) in report.files.iter().enumerate() {
            prop_assert_eq!(file.id, i as u64);
            prop_assert_eq!(file.start_offset, expected_starts[i]);
            prop_assert!(!file.truncated);
        }
        prop_assert!(report.files.windows(2).all(|w| w[0].start_offset < w[1].start_offset));
    }
}

// ============================================================================
// Data conditions
// ============================================================================

#[rstest]
#[case(1)]
#[case(4)]
#[case(4096)]
fn test_no_match_counts_every_byte(#[case] capacity: usize) {
    let data: Vec<u8> = (0..1000u32).map(|i| (i % 0x40) as u8).collect();
    let (report, sink) = carve(png(), &data, capacity);

    assert!(report.files.is_empty());
    assert!(sink.is_empty());
    assert_eq!(report.session.total_bytes_scanned, 1000);
    assert!(!report.cancelled);
}

#[rstest]
#[case(2)]
#[case(5)]
#[case(64)]
fn test_truncated_tail(#[case] capacity: usize) {
    let data = b"....<<abcdefghij";
    let (report, sink) = carve(arrows(), data, capacity);

    assert_eq!(report.files.len(), 1);
    let file = &report.files[0];
    assert!(file.truncated);
    assert_eq!(file.end_offset, None);
    assert_eq!(file.start_offset, 4);
    assert_eq!(file.bytes_written, 12);
    assert_eq!(sink.artifact(0).unwrap(), b"<<abcdefghij");
    assert_eq!(report.truncated_count(), 1);
    assert_eq!(report.complete_count(), 0);
}

#[test]
fn test_empty_source() {
    let (report, _) = carve(arrows(), b"", 8);
    assert!(report.files.is_empty());
    assert_eq!(report.session.total_bytes_scanned, 0);
}

#[test]
fn test_start_while_extracting_is_ignored() {
    let data = b"<<one<<two>>>";
    let (report, sink) = carve(arrows(), data, 4);

    assert_eq!(report.files.len(), 1);
    assert_eq!(report.files[0].start_offset, 0);
    assert_eq!(sink.artifact(0).unwrap(), data.to_vec());
}

// ============================================================================
// Resume after an end marker
// ============================================================================

#[rstest]
#[case(3)]
#[case(7)]
#[case(64)]
fn test_resume_one_byte_past_end_marker(#[case] capacity: usize) {
    let data = b"<<a>>><<b>>>x<<c>>>";
    let (report, sink) = carve(arrows(), data, capacity);

    let starts: Vec<_> = report.files.iter().map(|f| f.start_offset).collect();
    let ends: Vec<_> = report.files.iter().map(|f| f.end_offset).collect();
    assert_eq!(starts, vec![0, 6, 13]);
    assert_eq!(ends, vec![Some(5), Some(11), Some(18)]);

    assert_eq!(sink.artifact(0).unwrap(), b"<<a>>>");
    assert_eq!(sink.artifact(1).unwrap(), b"<<b>>>");
    assert_eq!(sink.artifact(2).unwrap(), b"<<c>>>");
    assert_eq!(report.session.total_bytes_scanned, data.len() as u64);
}

#[test]
fn test_end_marker_bytes_are_not_reused_as_start() {
    // The end marker's last byte equals the start marker; it belongs to the
    // closed file and must not open a new one.
    let signature = SignatureEntry::new("bin", b"S".to_vec(), b"ES".to_vec()).unwrap();
    let (report, sink) = carve(signature, b"SxESyy", 2);

    assert_eq!(report.files.len(), 1);
    assert_eq!(report.files[0].end_offset, Some(3));
    assert_eq!(sink.artifact(0).unwrap(), b"SxES");
}

#[test]
fn test_start_directly_after_end_in_same_chunk() {
    let (report, sink) = carve(arrows(), b"<<1>>><<2>>>", 4096);
    assert_eq!(report.files.len(), 2);
    assert_eq!(sink.artifact(1).unwrap(), b"<<2>>>");
}

// ============================================================================
// Built-in signatures
// ============================================================================

#[rstest]
#[case("jpg")]
#[case("jpeg")]
#[case("png")]
#[case("pdf")]
#[case("docx")]
fn test_builtin_signature_carves(#[case] extension: &str) {
    let signature = SignatureDirectory::with_defaults().lookup(extension).unwrap().clone();
    let mut data = b"...........".to_vec();
    let start = data.len() as u64;
    data.extend_from_slice(signature.start_marker());
    data.extend_from_slice(b"payload bytes");
    data.extend_from_slice(signature.end_marker());
    let end = data.len() as u64 - 1;
    data.extend_from_slice(b"....");

    let (report, _) = carve(signature, &data, 7);

    assert_eq!(report.extension, extension);
    assert_eq!(report.files.len(), 1);
    assert_eq!(report.files[0].start_offset, start);
    assert_eq!(report.files[0].end_offset, Some(end));
    assert_eq!(report.files[0].file_name(), format!("0.{}", extension));
}

// ============================================================================
// Cancellation
// ============================================================================

struct CancelOnOpen(CancelFlag);

impl ScanObserver for CancelOnOpen {
    fn on_file_opened(&mut self, _file: &RecoveredFile) {
        self.0.cancel();
    }
}

#[test]
fn test_cancel_before_start() {
    let cancel = CancelFlag::new();
    cancel.cancel();

    let mut carver = Carver::new(arrows(), ChunkCapacity::default(), MemorySink::new());
    let mut source = MemorySource::new(b"<<a>>>".to_vec());
    let report = carver.run(&mut source, &cancel).unwrap();

    assert!(report.cancelled);
    assert!(report.files.is_empty());
    assert_eq!(source.reads(), 0);
}

#[test]
fn test_cancel_truncates_open_file() {
    let cancel = CancelFlag::new();
    let sink = MemorySink::new();
    let mut carver = Carver::new(arrows(), ChunkCapacity::new(4).unwrap(), sink.clone())
        .with_observer(CancelOnOpen(cancel.clone()));
    let mut source = MemorySource::new(b"<<abcdefgh>>>".to_vec());

    let report = carver.run(&mut source, &cancel).unwrap();

    assert!(report.cancelled);
    assert_eq!(report.files.len(), 1);
    assert!(report.files[0].truncated);
    assert_eq!(report.files[0].end_offset, None);
    assert_eq!(sink.artifact(0).unwrap(), b"<<ab");
    assert!(!carver.is_extracting());
}

// ============================================================================
// Source failures
// ============================================================================

/// Serves `left` chunks from the wrapped source, then fails every read.
struct FailAfter {
    left: usize,
    inner: MemorySource,
}

impl ByteSource for FailAfter {
    fn read_chunk(&mut self, buffer: &mut [u8]) -> chisel::Result<usize> {
        if self.left == 0 {
            return Err(CarveError::Read {
                offset: self.inner.position(),
                source: io::Error::other("bad sector"),
            });
        }
        self.left -= 1;
        self.inner.read_chunk(buffer)
    }

    fn seek_absolute(&mut self, offset: u64) -> chisel::Result<()> {
        self.inner.seek_absolute(offset)
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }
}

#[test]
fn test_read_failure_keeps_open_file_as_truncated() {
    let sink = MemorySink::new();
    let mut carver = Carver::new(arrows(), ChunkCapacity::new(4).unwrap(), sink.clone());
    let mut source = FailAfter {
        left: 2,
        inner: MemorySource::new(b"..<<abcdefgh>>>".to_vec()),
    };

    let err = carver.run(&mut source, &CancelFlag::new()).unwrap_err();

    assert!(err.is_io());
    assert!(matches!(err, CarveError::Read { offset: 8, .. }));
    assert!(!carver.is_extracting());

    let recovered = carver.recovered();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].start_offset, 2);
    assert_eq!(recovered[0].end_offset, None);
    assert!(recovered[0].truncated);
    assert_eq!(recovered[0].bytes_written, 6);
    assert_eq!(sink.artifact(0).unwrap(), b"<<abcd");
}

// ============================================================================
// Sink failures
// ============================================================================

/// Fails every write for one record id.
struct FailingSink {
    fail_id: u64,
    inner: MemorySink,
}

struct FailingWriter {
    fail: bool,
    inner: <MemorySink as Sink>::Writer,
}

impl Sink for FailingSink {
    type Writer = FailingWriter;

    fn open(&mut self, file: &RecoveredFile) -> io::Result<FailingWriter> {
        Ok(FailingWriter {
            fail: file.id == self.fail_id,
            inner: self.inner.open(file)?,
        })
    }
}

impl ArtifactWriter for FailingWriter {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.fail {
            return Err(io::Error::other("disk full"));
        }
        self.inner.write_all(bytes)
    }

    fn finish(self, file: &RecoveredFile) -> io::Result<ArtifactReceipt> {
        self.inner.finish(file)
    }
}

#[fixture]
fn failing_first() -> FailingSink {
    FailingSink {
        fail_id: 0,
        inner: MemorySink::new(),
    }
}

#[rstest]
fn test_sink_failure_aborts(failing_first: FailingSink) {
    let mut carver = Carver::new(arrows(), ChunkCapacity::new(64).unwrap(), failing_first);
    let mut source = MemorySource::new(b"<<aa>>><<bb>>>".to_vec());

    let err = carver.run(&mut source, &CancelFlag::new()).unwrap_err();

    assert!(matches!(err, CarveError::Sink { id: 0, .. }));
    assert!(err.is_io());
    assert_eq!(carver.recovered().len(), 1);
    assert!(carver.recovered()[0].truncated);
    assert!(!carver.is_extracting());
}

#[rstest]
fn test_sink_failure_skips(failing_first: FailingSink) {
    let store = failing_first.inner.clone();
    let mut carver = Carver::new(arrows(), ChunkCapacity::new(64).unwrap(), failing_first)
        .with_failure_policy(SinkFailurePolicy::Skip);
    let data = b"<<aa>>><<bb>>>";
    let mut source = MemorySource::new(data.to_vec());

    let report = carver.run(&mut source, &CancelFlag::new()).unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, 0);
    assert_eq!(report.files.len(), 2);
    assert!(report.files[0].truncated);
    assert_eq!(report.files[1].id, 1);
    assert_eq!(report.files[1].start_offset, 7);
    assert!(!report.files[1].truncated);
    assert_eq!(store.artifact(1).unwrap(), b"<<bb>>>");
    assert_eq!(report.session.total_bytes_scanned, data.len() as u64);
}
