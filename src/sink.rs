//! Artifact sinks
//!
//! A [`Sink`] hands out one [`ArtifactWriter`] per recovered file. The writer
//! lives exactly as long as the extraction: it is opened when the start
//! marker matches, receives bytes as chunks are scanned, and is consumed by
//! [`ArtifactWriter::finish`]. Writers dropped without `finish` (error or
//! cancellation paths) still flush and release what they hold.

use crate::custody::{self, ChainOfCustody};
use crate::types::RecoveredFile;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const WRITE_BUFFER_SIZE: usize = 128 * 1024;

/// Result of finishing one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactReceipt {
    pub id: u64,
    pub bytes_written: u64,
    pub sha256: String,
    pub path: Option<PathBuf>,
    pub custody_path: Option<PathBuf>,
}

pub trait ArtifactWriter {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Flushes and releases the artifact. `file` is the finalized record.
    fn finish(self, file: &RecoveredFile) -> io::Result<ArtifactReceipt>;
}

pub trait Sink {
    type Writer: ArtifactWriter;

    /// Acquires the output artifact for a freshly opened record.
    fn open(&mut self, file: &RecoveredFile) -> io::Result<Self::Writer>;
}

impl<K: Sink + ?Sized> Sink for &mut K {
    type Writer = K::Writer;

    fn open(&mut self, file: &RecoveredFile) -> io::Result<Self::Writer> {
        (**self).open(file)
    }
}

/// Writes each artifact as `<id>.<extension>` inside one directory.
#[derive(Debug)]
pub struct DirectorySink {
    output_dir: PathBuf,
    custody: bool,
    overwrite: bool,
}

impl DirectorySink {
    /// Creates the output directory if needed.
    pub fn new(output_dir: impl AsRef<Path>) -> io::Result<Self> {
        let output_dir = output_dir.as_ref();
        fs::create_dir_all(output_dir)?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            custody: false,
            overwrite: false,
        })
    }

    /// Also write a `.custody.json` sidecar per artifact.
    pub fn with_custody(mut self, enabled: bool) -> Self {
        self.custody = enabled;
        self
    }

    pub fn with_overwrite(mut self, enabled: bool) -> Self {
        self.overwrite = enabled;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl Sink for DirectorySink {
    type Writer = FileArtifact;

    fn open(&mut self, file: &RecoveredFile) -> io::Result<FileArtifact> {
        let path = self.output_dir.join(file.file_name());
        let handle = if self.overwrite {
            File::create(&path)?
        } else {
            File::create_new(&path)?
        };

        Ok(FileArtifact {
            path,
            writer: BufWriter::with_capacity(WRITE_BUFFER_SIZE, handle),
            hasher: Sha256::new(),
            bytes_written: 0,
            custody: self.custody,
        })
    }
}

pub struct FileArtifact {
    path: PathBuf,
    writer: BufWriter<File>,
    hasher: Sha256,
    bytes_written: u64,
    custody: bool,
}

impl FileArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArtifactWriter for FileArtifact {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.hasher.update(bytes);
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    fn finish(mut self, file: &RecoveredFile) -> io::Result<ArtifactReceipt> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        let sha256 = hex::encode(self.hasher.finalize());
        let custody_path = if self.custody {
            let record = ChainOfCustody::new(file, &sha256);
            Some(custody::write_sidecar(&self.path, &record)?)
        } else {
            None
        };

        Ok(ArtifactReceipt {
            id: file.id,
            bytes_written: self.bytes_written,
            sha256,
            path: Some(self.path),
            custody_path,
        })
    }
}

type ArtifactStore = Arc<Mutex<BTreeMap<u64, Vec<u8>>>>;

/// Keeps artifacts in memory, keyed by record id.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    store: ArtifactStore,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far for one record.
    pub fn artifact(&self, id: u64) -> Option<Vec<u8>> {
        self.store.lock().get(&id).cloned()
    }

    pub fn artifacts(&self) -> BTreeMap<u64, Vec<u8>> {
        self.store.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }
}

impl Sink for MemorySink {
    type Writer = MemoryArtifact;

    fn open(&mut self, file: &RecoveredFile) -> io::Result<MemoryArtifact> {
        self.store.lock().insert(file.id, Vec::new());
        Ok(MemoryArtifact {
            id: file.id,
            store: Arc::clone(&self.store),
            hasher: Sha256::new(),
        })
    }
}

pub struct MemoryArtifact {
    id: u64,
    store: ArtifactStore,
    hasher: Sha256,
}

impl ArtifactWriter for MemoryArtifact {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.store.lock().entry(self.id).or_default().extend_from_slice(bytes);
        self.hasher.update(bytes);
        Ok(())
    }

    fn finish(self, file: &RecoveredFile) -> io::Result<ArtifactReceipt> {
        let bytes_written = self.store.lock().get(&self.id).map_or(0, |b| b.len() as u64);
        Ok(ArtifactReceipt {
            id: file.id,
            bytes_written,
            sha256: hex::encode(self.hasher.finalize()),
            path: None,
            custody_path: None,
        })
    }
}
