//! Chain-of-custody sidecars
//!
//! Every artifact written to disk can carry a JSON record of where it came
//! from on the source medium and what its content hash was at recovery time.

use crate::types::RecoveredFile;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainOfCustody {
    pub filename: String,
    pub source_offset: String,
    pub source_offset_decimal: u64,
    pub end_offset: Option<String>,
    pub file_size: u64,
    pub sha256_hash: String,
    pub recovery_timestamp: String,
    pub extension: String,
    pub truncated: bool,
}

impl ChainOfCustody {
    pub fn new(file: &RecoveredFile, sha256_hash: &str) -> Self {
        Self {
            filename: file.file_name(),
            source_offset: format!("0x{:016X}", file.start_offset),
            source_offset_decimal: file.start_offset,
            end_offset: file.end_offset.map(|end| format!("0x{:016X}", end)),
            file_size: file.bytes_written,
            sha256_hash: sha256_hash.to_string(),
            recovery_timestamp: Utc::now().to_rfc3339(),
            extension: file.extension.clone(),
            truncated: file.truncated,
        }
    }
}

/// `<artifact>.custody.json` next to the artifact.
pub fn sidecar_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.file_name().unwrap_or_default().to_os_string();
    name.push(".custody.json");
    artifact.with_file_name(name)
}

pub fn write_sidecar(artifact: &Path, record: &ChainOfCustody) -> io::Result<PathBuf> {
    let path = sidecar_path(artifact);
    let json = serde_json::to_string_pretty(record).map_err(io::Error::other)?;
    fs::write(&path, json)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_path() {
        let path = sidecar_path(Path::new("/out/7.pdf"));
        assert_eq!(path, PathBuf::from("/out/7.pdf.custody.json"));
    }

    #[test]
    fn test_record_fields() {
        let file = RecoveredFile {
            id: 2,
            extension: "jpg".into(),
            start_offset: 0x1000,
            end_offset: Some(0x10FF),
            truncated: false,
            bytes_written: 256,
        };
        let record = ChainOfCustody::new(&file, "abc");
        assert_eq!(record.filename, "2.jpg");
        assert_eq!(record.source_offset, "0x0000000000001000");
        assert_eq!(record.end_offset.as_deref(), Some("0x00000000000010FF"));
        assert_eq!(record.file_size, 256);
        assert!(!record.truncated);
    }
}
