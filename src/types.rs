use serde::{Deserialize, Serialize};

pub type Offset = u64;

/// One carved byte range.
///
/// Created when a start marker matches and finalized when the end marker is
/// found (`truncated == false`) or the scan stops first (`truncated == true`,
/// `end_offset == None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveredFile {
    pub id: u64,
    pub extension: String,
    pub start_offset: Offset,
    /// Absolute offset of the end marker's last byte.
    pub end_offset: Option<Offset>,
    pub truncated: bool,
    pub bytes_written: u64,
}

impl RecoveredFile {
    pub(crate) fn open(id: u64, extension: &str, start_offset: Offset) -> Self {
        Self {
            id,
            extension: extension.to_string(),
            start_offset,
            end_offset: None,
            truncated: true,
            bytes_written: 0,
        }
    }

    /// Conventional artifact name, `<id>.<extension>`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.id, self.extension)
    }

    /// Carved length when the end marker was found.
    pub fn len(&self) -> Option<u64> {
        self.end_offset.map(|end| end - self.start_offset + 1)
    }

    pub fn is_complete(&self) -> bool {
        !self.truncated
    }
}
