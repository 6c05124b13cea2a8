//! Scan configuration
//!
//! Everything a scan needs besides the signature table: which medium to read,
//! where artifacts go, and how the carver behaves. Values come from a JSON
//! file, from CLI flags, or from the builder methods below.

use crate::carver::SinkFailurePolicy;
use crate::error::{CarveError, Result};
use crate::signatures::{SignatureDirectory, SignatureEntry};
use crate::source::{ByteSource, ChunkCapacity, DEFAULT_CHUNK_CAPACITY, DiskReader, MmapSource};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Progress cadence of the interactive tool: one line per 250 MiB scanned.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 250 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Block device or image file to carve from
    pub source: Option<PathBuf>,
    /// Directory receiving `<id>.<extension>` artifacts
    pub output_dir: PathBuf,
    /// File type to carve (one per scan)
    pub extension: Option<String>,
    /// Bytes requested per read
    pub chunk_capacity: usize,
    /// Write a chain-of-custody sidecar per artifact
    pub custody: bool,
    /// Replace existing artifacts in `output_dir`
    pub overwrite: bool,
    pub failure_policy: SinkFailurePolicy,
    pub progress_interval: u64,
    /// Memory-map regular image files instead of reading them
    pub use_mmap: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            source: None,
            output_dir: PathBuf::from("./recovered"),
            extension: None,
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            custody: true,
            overwrite: false,
            failure_policy: SinkFailurePolicy::Abort,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            use_mmap: false,
        }
    }
}

impl ScanConfig {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(source.into()),
            ..Default::default()
        }
    }

    /// Loads a JSON config file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_chunk_capacity(mut self, bytes: usize) -> Self {
        self.chunk_capacity = bytes;
        self
    }

    pub fn with_custody(mut self, enabled: bool) -> Self {
        self.custody = enabled;
        self
    }

    pub fn with_failure_policy(mut self, policy: SinkFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_mmap(mut self, enabled: bool) -> Self {
        self.use_mmap = enabled;
        self
    }

    /// Looks up the signature and validates the chunk capacity. Performs no
    /// I/O, so an unsupported type is reported before the source is touched.
    pub fn resolve(&self, directory: &SignatureDirectory) -> Result<ResolvedScan> {
        let extension = self.extension.as_deref().unwrap_or_default();
        let signature = directory.lookup(extension)?.clone();
        let (capacity, capacity_warning) = ChunkCapacity::resolve(self.chunk_capacity);

        if let Some(warning) = &capacity_warning {
            tracing::warn!("{}", warning);
        }

        Ok(ResolvedScan {
            signature,
            capacity,
            capacity_warning,
        })
    }

    /// Opens the configured source. Regular files are memory-mapped when
    /// `use_mmap` is set; devices always go through [`DiskReader`].
    pub fn open_source(&self) -> Result<Box<dyn ByteSource>> {
        let path = self
            .source
            .as_deref()
            .ok_or_else(|| CarveError::Io(std::io::Error::other("no source configured")))?;

        if self.use_mmap && fs::metadata(path)?.is_file() {
            return Ok(Box::new(MmapSource::open(path)?));
        }
        Ok(Box::new(DiskReader::open(path)?))
    }
}

/// Validated inputs for one carving session.
#[derive(Debug)]
pub struct ResolvedScan {
    pub signature: SignatureEntry,
    pub capacity: ChunkCapacity,
    /// Set when the configured capacity was rejected and the default used.
    pub capacity_warning: Option<CarveError>,
}
