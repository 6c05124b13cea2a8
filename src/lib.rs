pub mod carver;
pub mod config;
pub mod custody;
pub mod devices;
mod error;
pub mod observer;
pub mod recovery;
pub mod session;
pub mod signatures;
pub mod sink;
pub mod source;
pub mod types;

pub use carver::{CancelFlag, CarveReport, Carver, ChunkOutcome, SinkFailurePolicy};
pub use config::ScanConfig;
pub use error::{CarveError, Result};
pub use observer::{LogObserver, NoopObserver, ScanObserver};
pub use session::{ScanSession, ScanSnapshot};
pub use signatures::{SignatureDirectory, SignatureEntry};
pub use sink::{ArtifactReceipt, ArtifactWriter, DirectorySink, MemorySink, Sink};
pub use source::{ByteSource, ChunkCapacity, DiskReader, MemorySource, MmapSource};
pub use types::{Offset, RecoveredFile};
