use std::io::{self, Read, Write};
use std::marker::PhantomData;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Serialization capability for the records of a collection.
///
/// The codec value is shared by every collection of a policy and is passed
/// to each call, so it can carry whatever context the record type needs
/// (a key store handle, a string interner, counters).
///
/// `restore` must read members back in exactly the order `dispose` wrote
/// them: swap images have no separators and no record count.
pub trait MemberCodec: Send + Sync {
    type Member: Send;

    /// Releases a member that is removed from memory without being persisted.
    fn destroy(&self, member: Self::Member) {
        drop(member);
    }

    fn dispose<W: Write>(&self, member: &Self::Member, out: &mut W) -> io::Result<()>;

    fn restore<R: Read>(&self, input: &mut R) -> io::Result<Self::Member>;

    /// Width of a member in the collection's array.
    fn record_size(&self) -> usize {
        std::mem::size_of::<Self::Member>()
    }

    /// Width of `member`, checked against `record_size` on append.
    fn member_size(&self, _member: &Self::Member) -> usize {
        self.record_size()
    }
}

/// Codec for plain-old-data records: the image is the raw bytes of the value.
pub struct PodCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> PodCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for PodCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemberCodec for PodCodec<T>
where
    T: FromBytes + IntoBytes + Immutable + KnownLayout + Send,
{
    type Member = T;

    fn dispose<W: Write>(&self, member: &T, out: &mut W) -> io::Result<()> {
        out.write_all(member.as_bytes())
    }

    fn restore<R: Read>(&self, input: &mut R) -> io::Result<T> {
        let mut member = T::new_zeroed();
        input.read_exact(member.as_mut_bytes())?;
        Ok(member)
    }
}

/// Codec for opaque records of a fixed byte width.
#[derive(Clone, Copy, Debug)]
pub struct FixedBytesCodec {
    width: usize,
}

impl FixedBytesCodec {
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

impl MemberCodec for FixedBytesCodec {
    type Member = Box<[u8]>;

    fn dispose<W: Write>(&self, member: &Box<[u8]>, out: &mut W) -> io::Result<()> {
        debug_assert_eq!(member.len(), self.width);
        out.write_all(member)
    }

    fn restore<R: Read>(&self, input: &mut R) -> io::Result<Box<[u8]>> {
        let mut member = vec![0u8; self.width].into_boxed_slice();
        input.read_exact(&mut member)?;
        Ok(member)
    }

    fn record_size(&self) -> usize {
        self.width
    }

    fn member_size(&self, member: &Box<[u8]>) -> usize {
        member.len()
    }
}

/// Codec for records owning a variable-length byte buffer.
///
/// Each member is written as a big-endian `u32` length followed by the bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlobCodec;

impl MemberCodec for BlobCodec {
    type Member = Vec<u8>;

    fn dispose<W: Write>(&self, member: &Vec<u8>, out: &mut W) -> io::Result<()> {
        let len = u32::try_from(member.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "blob exceeds u32::MAX"))?;
        out.write_u32::<BigEndian>(len)?;
        out.write_all(member)
    }

    fn restore<R: Read>(&self, input: &mut R) -> io::Result<Vec<u8>> {
        let len = input.read_u32::<BigEndian>()? as usize;
        let mut member = vec![0u8; len];
        input.read_exact(&mut member)?;
        Ok(member)
    }
}
