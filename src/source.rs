//! Byte sources
//!
//! Sequential, read-only access to the medium being carved. A source hands
//! out chunks from its cursor and can be repositioned to any absolute offset.

use crate::error::{CarveError, Result};
use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub const DEFAULT_CHUNK_CAPACITY: usize = 4096;
pub const MAX_CHUNK_CAPACITY: usize = 256 * 1024 * 1024;

/// Chunk sizes offered to interactive users, in menu order.
pub const CHUNK_SIZE_MENU: [usize; 4] = [4096, 8192, 65536, 1048576];

/// A validated read size for [`ByteSource::read_chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCapacity(usize);

impl ChunkCapacity {
    /// Accepts any capacity in `1..=MAX_CHUNK_CAPACITY`.
    pub fn new(bytes: usize) -> Result<Self> {
        if bytes == 0 || bytes > MAX_CHUNK_CAPACITY {
            return Err(CarveError::InvalidChunkCapacity {
                requested: bytes,
                substituted: DEFAULT_CHUNK_CAPACITY,
            });
        }
        Ok(Self(bytes))
    }

    /// Like [`ChunkCapacity::new`] but falls back to the default, returning
    /// the rejection alongside so the caller can report it.
    pub fn resolve(bytes: usize) -> (Self, Option<CarveError>) {
        match Self::new(bytes) {
            Ok(capacity) => (capacity, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    /// Maps a 1-based [`CHUNK_SIZE_MENU`] choice.
    pub fn from_menu(choice: usize) -> (Self, Option<CarveError>) {
        match choice.checked_sub(1).and_then(|i| CHUNK_SIZE_MENU.get(i)) {
            Some(&bytes) => (Self(bytes), None),
            None => (
                Self::default(),
                Some(CarveError::InvalidChunkCapacity {
                    requested: choice,
                    substituted: DEFAULT_CHUNK_CAPACITY,
                }),
            ),
        }
    }

    /// Accepts a [`CHUNK_SIZE_MENU`] size in bytes or its 1-based position.
    /// Anything else falls back to the default with the rejection returned.
    pub fn from_menu_value(value: usize) -> (Self, Option<CarveError>) {
        if CHUNK_SIZE_MENU.contains(&value) {
            return (Self(value), None);
        }
        Self::from_menu(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for ChunkCapacity {
    fn default() -> Self {
        Self(DEFAULT_CHUNK_CAPACITY)
    }
}

/// Sequential reader over a device, image or buffer.
///
/// `read_chunk` fills as much of `buffer` as the source allows. A result
/// shorter than `buffer.len()` means the end of the source was reached and
/// `0` means it is exhausted. Implementations never return a short read in
/// the middle of the stream.
pub trait ByteSource {
    fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Moves the cursor to an absolute byte offset.
    fn seek_absolute(&mut self, offset: u64) -> Result<()>;

    /// Absolute offset of the next byte `read_chunk` will return.
    fn position(&self) -> u64;

    /// Total size if known. Never used to terminate a scan.
    fn size_hint(&self) -> Option<u64> {
        None
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize> {
        (**self).read_chunk(buffer)
    }

    fn seek_absolute(&mut self, offset: u64) -> Result<()> {
        (**self).seek_absolute(offset)
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn size_hint(&self) -> Option<u64> {
        (**self).size_hint()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize> {
        (**self).read_chunk(buffer)
    }

    fn seek_absolute(&mut self, offset: u64) -> Result<()> {
        (**self).seek_absolute(offset)
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn size_hint(&self) -> Option<u64> {
        (**self).size_hint()
    }
}

/// Reads until `buffer` is full or the reader reports end of stream.
fn fill_buffer<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// File-backed source for block devices and disk images.
pub struct DiskReader {
    file: File,
    path: PathBuf,
    position: u64,
    size: Option<u64>,
}

impl DiskReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new().read(true).write(false).open(path)?;

        #[cfg(target_os = "linux")]
        {
            use rustix::fs::{Advice, fadvise};
            let _ = fadvise(&file, 0, None, Advice::Sequential);
            let _ = fadvise(&file, 0, None, Advice::NoReuse);
        }

        // Block devices report a zero metadata length; seeking to the end
        // gives their real capacity.
        let mut size = file.metadata()?.len();
        if size == 0 {
            size = file.seek(SeekFrom::End(0))?;
            file.seek(SeekFrom::Start(0))?;
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            position: 0,
            size: (size > 0).then_some(size),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for DiskReader {
    fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let n = fill_buffer(&mut self.file, buffer).map_err(|source| CarveError::Read {
            offset: self.position,
            source,
        })?;
        self.position += n as u64;
        Ok(n)
    }

    fn seek_absolute(&mut self, offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    #[inline]
    fn position(&self) -> u64 {
        self.position
    }

    fn size_hint(&self) -> Option<u64> {
        self.size
    }
}

/// Memory-mapped source for regular image files.
pub struct MmapSource {
    mmap: Mmap,
    position: u64,
}

impl MmapSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;

        if file.metadata()?.len() == 0 {
            return Err(CarveError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map an empty file (block devices must use DiskReader)",
            )));
        }

        let mmap = unsafe { Mmap::map(&file) }?;

        #[cfg(target_os = "linux")]
        {
            let _ = mmap.advise(memmap2::Advice::Sequential);
        }

        Ok(Self { mmap, position: 0 })
    }
}

impl ByteSource for MmapSource {
    fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let start = (self.position as usize).min(self.mmap.len());
        let end = start.saturating_add(buffer.len()).min(self.mmap.len());
        let n = end - start;
        buffer[..n].copy_from_slice(&self.mmap[start..end]);
        self.position += n as u64;
        Ok(n)
    }

    fn seek_absolute(&mut self, offset: u64) -> Result<()> {
        self.position = offset;
        Ok(())
    }

    #[inline]
    fn position(&self) -> u64 {
        self.position
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.mmap.len() as u64)
    }
}

/// In-memory source, mostly for tests and for carving buffers already
/// loaded by the caller.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Vec<u8>,
    position: u64,
    reads: usize,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            position: 0,
            reads: 0,
        }
    }

    /// Number of `read_chunk` calls served so far.
    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSource for MemorySource {
    fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize> {
        self.reads += 1;
        let start = (self.position as usize).min(self.data.len());
        let end = start.saturating_add(buffer.len()).min(self.data.len());
        let n = end - start;
        buffer[..n].copy_from_slice(&self.data[start..end]);
        self.position += n as u64;
        Ok(n)
    }

    fn seek_absolute(&mut self, offset: u64) -> Result<()> {
        self.position = offset;
        Ok(())
    }

    #[inline]
    fn position(&self) -> u64 {
        self.position
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}
