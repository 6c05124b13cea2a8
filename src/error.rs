use std::io;
use thiserror::Error;

/// Errors raised while carving files out of a raw byte source.
#[derive(Debug, Error)]
pub enum CarveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Read error at offset 0x{offset:X}: {source}")]
    Read {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("Sink error for recovered file {id}: {source}")]
    Sink {
        id: u64,
        #[source]
        source: io::Error,
    },

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Duplicate file type: {0}")]
    DuplicateType(String),

    #[error("Invalid chunk capacity {requested}, using {substituted} bytes")]
    InvalidChunkCapacity { requested: usize, substituted: usize },

    #[error("Signature '{extension}' has an empty {which} marker")]
    EmptyMarker {
        extension: String,
        which: &'static str,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CarveError {
    /// True for every failure that originates in source or sink I/O.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            CarveError::Io(_) | CarveError::Read { .. } | CarveError::Sink { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CarveError>;
