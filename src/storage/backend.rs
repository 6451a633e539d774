use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("cannot open backing store {}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("swap image at offset {offset} is truncated ({actual} of {expected} bytes)")]
    ShortImage {
        offset: u64,
        expected: usize,
        actual: usize,
    },
}

/// An append-only byte sink holding the images of evicted collections.
///
/// Writes only ever go to the end of the store. The returned offset is the
/// only handle to the image, the store itself keeps no index.
pub trait SwapBackend: Send + Sync {
    fn append(&self, image: &[u8]) -> Result<u64, StorageError>;
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError>;
    fn len(&self) -> u64;
    fn sync(&self) -> Result<(), StorageError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Backing store on a regular file.
///
/// The file is truncated when opened: images from a previous process are
/// meaningless without the in-memory offsets that pointed at them.
pub struct FileBackend {
    file: File,
    end: AtomicU64,
}

impl FileBackend {
    /// Creates (or truncates) the backing file at `path`.
    ///
    /// Returns a `Result` containing the backend if successful, or a `StorageError::Open` on failure.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| StorageError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            file,
            end: AtomicU64::new(0),
        })
    }

    /// Creates a backing store on an anonymous temporary file.
    ///
    /// The file is unlinked by the OS as soon as it is created and vanishes
    /// with the last handle.
    pub fn temporary() -> Result<Self, StorageError> {
        let file = tempfile::tempfile().map_err(|source| StorageError::Open {
            path: std::env::temp_dir(),
            source,
        })?;

        Ok(Self {
            file,
            end: AtomicU64::new(0),
        })
    }
}

impl SwapBackend for FileBackend {
    /// Writes `image` at the current end of the file.
    ///
    /// Returns the offset the image starts at. A failed write leaves a hole
    /// that nothing points to.
    fn append(&self, image: &[u8]) -> Result<u64, StorageError> {
        let offset = self.end.fetch_add(image.len() as u64, Ordering::Relaxed);

        self.file
            .write_all_at(image, offset)
            .map_err(StorageError::Io)?;

        Ok(offset)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        self.file
            .read_exact_at(buf, offset)
            .map_err(StorageError::Io)
    }

    fn len(&self) -> u64 {
        self.end.load(Ordering::Relaxed)
    }

    /// Attempts to sync file data and metadata to the disk.
    fn sync(&self) -> Result<(), StorageError> {
        self.file.sync_all().map_err(StorageError::Io)
    }
}

/// Backing store kept in process memory.
///
/// Swapping into memory does not save memory, but it keeps the swap
/// protocol identical to the file case, which makes it useful for tests and
/// for callers that want a bounded working set with a compact image format.
#[derive(Default)]
pub struct MemoryBackend {
    bytes: RwLock<Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SwapBackend for MemoryBackend {
    fn append(&self, image: &[u8]) -> Result<u64, StorageError> {
        let mut bytes = self.bytes.write();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(image);
        Ok(offset)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let bytes = self.bytes.read();
        let start = (offset as usize).min(bytes.len());
        let available = &bytes[start..];
        if available.len() < buf.len() {
            return Err(StorageError::ShortImage {
                offset,
                expected: buf.len(),
                actual: available.len(),
            });
        }

        buf.copy_from_slice(&available[..buf.len()]);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.bytes.read().len() as u64
    }

    fn sync(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
