use crate::member::MemberCodec;
use crate::storage::{MemoryBackend, StorageError, SwapBackend};

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

// written by `FaultyBackend` when corrupting reads, refused by `U32Codec`
const POISON: u32 = u32::MAX;

/// `u32` records that count every codec call.
#[derive(Default)]
pub(crate) struct U32Codec {
    destroyed: AtomicUsize,
    disposed: AtomicUsize,
    restored: AtomicUsize,
}

impl U32Codec {
    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::Relaxed)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::Relaxed)
    }

    pub fn restored(&self) -> usize {
        self.restored.load(Ordering::Relaxed)
    }
}

impl MemberCodec for U32Codec {
    type Member = u32;

    fn destroy(&self, _member: u32) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    fn dispose<W: Write>(&self, member: &u32, out: &mut W) -> io::Result<()> {
        self.disposed.fetch_add(1, Ordering::Relaxed);
        out.write_u32::<LittleEndian>(*member)
    }

    fn restore<R: Read>(&self, input: &mut R) -> io::Result<u32> {
        let member = input.read_u32::<LittleEndian>()?;
        if member == POISON {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "poisoned record"));
        }
        self.restored.fetch_add(1, Ordering::Relaxed);
        Ok(member)
    }
}

/// In-memory backend whose reads and writes can be made to fail.
#[derive(Clone, Default)]
pub(crate) struct FaultyBackend {
    inner: Arc<MemoryBackend>,
    fail_writes: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
    corrupt_reads: Arc<AtomicBool>,
}

impl FaultyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    pub fn corrupt_reads(&self, corrupt: bool) {
        self.corrupt_reads.store(corrupt, Ordering::Relaxed);
    }

    fn injected() -> StorageError {
        StorageError::Io(io::Error::other("injected fault"))
    }
}

impl SwapBackend for FaultyBackend {
    fn append(&self, image: &[u8]) -> Result<u64, StorageError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(Self::injected());
        }
        self.inner.append(image)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(Self::injected());
        }
        self.inner.read_at(offset, buf)?;
        if self.corrupt_reads.load(Ordering::Relaxed) {
            buf.fill(0xff);
        }
        Ok(())
    }

    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn sync(&self) -> Result<(), StorageError> {
        self.inner.sync()
    }
}
