mod backend;

pub use backend::{FileBackend, MemoryBackend, StorageError, SwapBackend};
