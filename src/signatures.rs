//! Signature directory
//!
//! Holds the start/end marker pairs that identify a file type on raw media.
//! Entries are keyed by lowercase extension and enumerate in sorted order.

use crate::error::{CarveError, Result};
use memchr::memmem;
use std::collections::BTreeMap;
use std::fmt;

const JPEG_START: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];
const JPEG_END: &[u8] = &[0xFF, 0xD9];
const PNG_START: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const PNG_END: &[u8] = &[0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82];
const PDF_START: &[u8] = b"%PDF-";
const PDF_END: &[u8] = b"%%EOF";
const DOCX_START: &[u8] = &[0x50, 0x4B, 0x03, 0x04];
const DOCX_END: &[u8] = &[0x50, 0x4B, 0x05, 0x06];

/// A start/end marker pair for one file extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEntry {
    extension: String,
    start_marker: Vec<u8>,
    end_marker: Vec<u8>,
}

impl SignatureEntry {
    /// Creates a new entry. The extension must not be blank and both markers
    /// must be non-empty.
    pub fn new(
        extension: impl Into<String>,
        start_marker: impl Into<Vec<u8>>,
        end_marker: impl Into<Vec<u8>>,
    ) -> Result<Self> {
        let extension = normalize(&extension.into());
        let start_marker = start_marker.into();
        let end_marker = end_marker.into();

        if extension.is_empty() {
            return Err(CarveError::UnsupportedType(extension));
        }
        if start_marker.is_empty() {
            return Err(CarveError::EmptyMarker {
                extension,
                which: "start",
            });
        }
        if end_marker.is_empty() {
            return Err(CarveError::EmptyMarker {
                extension,
                which: "end",
            });
        }

        Ok(Self {
            extension,
            start_marker,
            end_marker,
        })
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn start_marker(&self) -> &[u8] {
        &self.start_marker
    }

    pub fn end_marker(&self) -> &[u8] {
        &self.end_marker
    }

    /// Number of bytes carried across a chunk boundary so that either marker
    /// can still be matched when it straddles two reads.
    #[inline]
    pub fn carry_len(&self) -> usize {
        self.start_marker.len().max(self.end_marker.len()) - 1
    }

    /// Offset of the first start marker in `data`.
    #[inline]
    pub fn find_start(&self, data: &[u8]) -> Option<usize> {
        memmem::find(data, &self.start_marker)
    }

    /// Offset of the first end marker in `data`.
    #[inline]
    pub fn find_end(&self, data: &[u8]) -> Option<usize> {
        memmem::find(data, &self.end_marker)
    }
}

impl fmt::Display for SignatureEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<6} start {} end {}",
            self.extension,
            hex_spaced(&self.start_marker),
            hex_spaced(&self.end_marker)
        )
    }
}

fn hex_spaced(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Ordered, uniquely keyed table of known signatures.
#[derive(Debug, Clone, Default)]
pub struct SignatureDirectory {
    entries: BTreeMap<String, SignatureEntry>,
}

impl SignatureDirectory {
    /// Creates an empty directory
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Creates a directory holding the built-in jpg, jpeg, png, pdf and docx
    /// signatures.
    pub fn with_defaults() -> Self {
        let builtin: [(&str, &[u8], &[u8]); 5] = [
            ("jpg", JPEG_START, JPEG_END),
            ("jpeg", JPEG_START, JPEG_END),
            ("png", PNG_START, PNG_END),
            ("pdf", PDF_START, PDF_END),
            ("docx", DOCX_START, DOCX_END),
        ];

        let entries = builtin
            .into_iter()
            .map(|(ext, start, end)| {
                let entry = SignatureEntry {
                    extension: ext.to_string(),
                    start_marker: start.to_vec(),
                    end_marker: end.to_vec(),
                };
                (ext.to_string(), entry)
            })
            .collect();

        Self { entries }
    }

    /// Looks up an entry by extension, ignoring case and a leading dot.
    pub fn lookup(&self, extension: &str) -> Result<&SignatureEntry> {
        let key = normalize(extension);
        self.entries
            .get(&key)
            .ok_or(CarveError::UnsupportedType(key))
    }

    /// Registers a new entry. Existing extensions are never replaced.
    pub fn register(&mut self, entry: SignatureEntry) -> Result<()> {
        if self.entries.contains_key(entry.extension()) {
            return Err(CarveError::DuplicateType(entry.extension().to_string()));
        }
        self.entries.insert(entry.extension().to_string(), entry);
        Ok(())
    }

    pub fn contains(&self, extension: &str) -> bool {
        self.entries.contains_key(&normalize(extension))
    }

    /// Entries in extension order.
    pub fn iter(&self) -> impl Iterator<Item = &SignatureEntry> {
        self.entries.values()
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
