use crate::cache::{Body, CachePolicy, CollectionId, PolicyError, Residency};
use crate::member::MemberCodec;

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex};
use thiserror::Error;
use tracing::error;

const CURSOR_UNSTARTED: isize = -1;

#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("cache policy error")]
    Policy(#[from] PolicyError),
    #[error("record is {actual} bytes, collection holds {expected} byte records")]
    RecordSize { expected: usize, actual: usize },
}

/// A resizable array of records whose memory is managed by a [`CachePolicy`].
///
/// Every operation that reads or changes the records first touches the
/// collection: it becomes the most recently used one of its policy and is
/// swapped back in if it had been evicted. Any operation can therefore fail
/// with a storage error, even one that only needs memory.
///
/// A collection is not synchronized: operations take `&mut self`. Different
/// collections of the same policy can be used from different threads.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use swapstore::{CachePolicy, Collection, PolicyConfig, member::BlobCodec};
///
/// let config = PolicyConfig::default().with_residency_threshold(1);
/// let policy = Arc::new(CachePolicy::try_new(BlobCodec, config).unwrap());
///
/// let mut apex = Collection::new(&policy);
/// let mut www = Collection::new(&policy);
/// apex.append(b"SOA".to_vec()).unwrap();
/// www.append(b"A".to_vec()).unwrap();
/// assert!(!apex.is_resident());
///
/// assert_eq!(apex.to_vec().unwrap(), [b"SOA".to_vec()]);
/// assert!(!www.is_resident());
/// ```
pub struct Collection<C: MemberCodec> {
    policy: Arc<CachePolicy<C>>,
    id: CollectionId,
    body: Body<C::Member>,
    // index of the record last produced by `cursor_next`, -1 before the first step
    cursor: isize,
    released: bool,
}

impl<C: MemberCodec> Collection<C> {
    /// Creates an empty collection managed by `policy`.
    pub fn new(policy: &Arc<CachePolicy<C>>) -> Self {
        let body = Arc::new(Mutex::new(Residency::Resident(Vec::new())));
        let id = policy.register(Arc::clone(&body));

        Self {
            policy: Arc::clone(policy),
            id,
            body,
            cursor: CURSOR_UNSTARTED,
            released: false,
        }
    }

    pub fn id(&self) -> CollectionId {
        self.id
    }

    pub fn policy(&self) -> &Arc<CachePolicy<C>> {
        &self.policy
    }

    pub fn record_size(&self) -> usize {
        self.policy.codec().record_size()
    }

    /// Number of records, resident or not. Does not touch the collection.
    pub fn len(&self) -> usize {
        self.body.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_resident(&self) -> bool {
        self.body.lock().is_resident()
    }

    /// Appends a record at the end of the collection.
    pub fn append(&mut self, member: C::Member) -> Result<(), CollectionError> {
        let expected = self.record_size();
        let actual = self.policy.codec().member_size(&member);
        if actual != expected {
            return Err(CollectionError::RecordSize { expected, actual });
        }

        let mut records = self.policy.touch(self.id, &self.body)?;
        records.push(member);
        Ok(())
    }

    /// Removes the record at `index` and hands it to the codec's `destroy`.
    ///
    /// An index past the end is ignored. Returns `true` if a record was removed.
    pub fn delete_at(&mut self, index: usize) -> Result<bool, CollectionError> {
        if index >= self.len() {
            return Ok(false);
        }

        let mut records = self.policy.touch(self.id, &self.body)?;
        let member = records.remove(index);
        if records.is_empty() {
            *records = Vec::new();
        } else if records.len() <= records.capacity() / 4 {
            records.shrink_to_fit();
        }
        drop(records);

        self.policy.codec().destroy(member);
        Ok(true)
    }

    /// Removes the record last produced by [`cursor_next`](Self::cursor_next).
    pub fn delete_at_cursor(&mut self) -> Result<bool, CollectionError> {
        match usize::try_from(self.cursor) {
            Ok(index) => self.delete_at(index),
            Err(_) => Ok(false),
        }
    }

    /// Advances the cursor and returns the record under it.
    ///
    /// Records are produced from the last one to the first. After the first
    /// record, `None` is returned once and the cursor starts over on the
    /// following call. The collection stays pinned in memory while the
    /// returned reference is alive; evictions skip it, and dropping the
    /// reference evicts whatever they had to leave behind.
    pub fn cursor_next(&mut self) -> Result<Option<RecordRef<'_, C>>, CollectionError> {
        let records = self.policy.touch(self.id, &self.body)?;
        if self.cursor < 0 {
            self.cursor = records.len() as isize;
        }

        self.cursor -= 1;
        let Ok(index) = usize::try_from(self.cursor) else {
            return Ok(None);
        };

        match MappedMutexGuard::try_map(records, |records| records.get_mut(index)) {
            Ok(guard) => Ok(Some(RecordRef {
                guard,
                _settle: Settle {
                    policy: &self.policy,
                },
            })),
            Err(_) => {
                // records were deleted behind the cursor
                self.cursor = CURSOR_UNSTARTED;
                Ok(None)
            }
        }
    }

    /// Resets the cursor so the next step starts again from the last record.
    pub fn rewind(&mut self) {
        self.cursor = CURSOR_UNSTARTED;
    }

    /// Runs `f` over the records in insertion order.
    ///
    /// The collection is pinned while `f` runs. Collections touched by `f`
    /// cannot evict it until `f` returns.
    pub fn with_records<R>(
        &mut self,
        f: impl FnOnce(&[C::Member]) -> R,
    ) -> Result<R, CollectionError> {
        let records = self.policy.touch(self.id, &self.body)?;
        let result = f(records.as_slice());
        drop(records);

        self.policy.settle()?;
        Ok(result)
    }

    /// Copies the records out in insertion order.
    pub fn to_vec(&mut self) -> Result<Vec<C::Member>, CollectionError>
    where
        C::Member: Clone,
    {
        self.with_records(|records| records.to_vec())
    }

    /// Destroys the collection and every record in it.
    ///
    /// An evicted collection is read back first so that each record reaches
    /// the codec's `destroy`. Dropping a collection does the same, but can
    /// only log a failure.
    pub fn destroy(mut self) -> Result<(), CollectionError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), CollectionError> {
        self.released = true;
        self.policy.unregister(self.id);

        let residency = std::mem::replace(&mut *self.body.lock(), Residency::Resident(Vec::new()));
        let records = match residency {
            Residency::Resident(records) => records,
            Residency::Evicted(image) => self.policy.restore_image(self.id, image)?,
        };

        let codec = self.policy.codec();
        for member in records {
            codec.destroy(member);
        }
        Ok(())
    }
}

impl<C: MemberCodec> Drop for Collection<C> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.release() {
            error!(collection = %self.id, error = %err, "cannot restore evicted records for teardown");
        }
    }
}

/// A record of a collection, borrowed from its resident array.
///
/// The whole collection is pinned until the reference is dropped.
pub struct RecordRef<'a, C: MemberCodec> {
    // fields drop in order: the pin is released before settling
    guard: MappedMutexGuard<'a, C::Member>,
    _settle: Settle<'a, C>,
}

impl<C: MemberCodec> Deref for RecordRef<'_, C> {
    type Target = C::Member;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<C: MemberCodec> DerefMut for RecordRef<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

struct Settle<'a, C: MemberCodec> {
    policy: &'a CachePolicy<C>,
}

impl<C: MemberCodec> Drop for Settle<'_, C> {
    fn drop(&mut self) {
        if let Err(err) = self.policy.settle() {
            error!(error = %err, "cannot evict collections skipped while pinned");
        }
    }
}
