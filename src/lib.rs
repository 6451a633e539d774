//! Disk-backed collections of records with a bounded resident set.
//!
//! A [`CachePolicy`] is shared by many [`Collection`]s. It keeps at most a
//! configured number of them in memory; touching one more writes the least
//! recently used collection, as a whole, to an append-only backing store and
//! frees its records. The records are read back on the next access.
//!
//! How records are written and read back is up to the caller, through a
//! [`MemberCodec`](member::MemberCodec).

pub mod cache;
pub mod collection;
pub mod config;
pub mod member;
pub mod storage;

#[cfg(test)]
mod testing;

pub use cache::{CachePolicy, CollectionId, PolicyError};
pub use collection::{Collection, CollectionError, RecordRef};
pub use config::{PolicyConfig, ResidencyThreshold};
