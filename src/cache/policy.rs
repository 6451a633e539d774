use crate::cache::chain::{CollectionId, LruChain};
use crate::config::{PolicyConfig, ResidencyThreshold};
use crate::member::MemberCodec;
use crate::storage::{FileBackend, StorageError, SwapBackend};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, trace, warn};

const NO_HEAD: usize = usize::MAX;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("backing store i/o failed")]
    Storage(#[from] StorageError),
    #[error("backing store unavailable")]
    StorageOpen(#[source] StorageError),
    #[error("cannot restore {count} records from swap image")]
    Restore {
        count: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("collection {0} is not resident")]
    NotResident(CollectionId),
}

/// Where an evicted collection's records are in the backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SwapImage {
    pub offset: u64,
    pub len: usize,
    pub count: usize,
}

/// A collection's records: either all in memory or all in the backing store.
///
/// A linked collection is always `Resident`. An unlinked one is either
/// `Evicted`, or `Resident` if it was never touched (or its first touch
/// failed before it could be linked).
pub(crate) enum Residency<M> {
    Resident(Vec<M>),
    Evicted(SwapImage),
}

impl<M> Residency<M> {
    pub fn len(&self) -> usize {
        match self {
            Self::Resident(records) => records.len(),
            Self::Evicted(image) => image.count,
        }
    }

    pub fn is_resident(&self) -> bool {
        matches!(self, Self::Resident(_))
    }

    fn image(&self) -> Option<SwapImage> {
        match self {
            Self::Resident(_) => None,
            Self::Evicted(image) => Some(*image),
        }
    }

    fn records_mut(&mut self) -> Option<&mut Vec<M>> {
        match self {
            Self::Resident(records) => Some(records),
            Self::Evicted(_) => None,
        }
    }
}

pub(crate) type Body<M> = Arc<Mutex<Residency<M>>>;

/// Shared eviction authority for a family of collections.
///
/// The policy bounds how many collections are resident at once. Touching a
/// collection moves it to the head of the LRU chain and, if the chain grew
/// past the residency threshold, writes the least recently used collections
/// to the backing store and frees their records.
///
/// Lock order is chain lock, then a collection's record lock. Nothing waits
/// on the chain lock while holding a record lock, and evictions only
/// `try_lock` their victims, so a collection pinned by a live [`RecordRef`]
/// is skipped rather than waited for. The threshold is restored once the pin
/// is released.
///
/// [`RecordRef`]: crate::collection::RecordRef
pub struct CachePolicy<C: MemberCodec> {
    codec: C,
    store: Option<Box<dyn SwapBackend>>,
    // 0 when unbounded
    threshold: AtomicUsize,
    chain: Mutex<LruChain<Body<C::Member>>>,
    // copy of the chain head for the lock-free fast path
    head: AtomicUsize,
    // the last eviction left the chain over the threshold
    overflowed: AtomicBool,
}

impl<C: MemberCodec> CachePolicy<C> {
    /// Creates a policy from `config`.
    ///
    /// If the backing store cannot be opened, swapping is disabled and every
    /// collection stays resident.
    pub fn new(codec: C, config: PolicyConfig) -> Self {
        let store = match Self::open_store(&config) {
            Ok(store) => store,
            Err(err) => {
                warn!(path = ?config.backing_path, error = %err, "cannot open backing store, swapping disabled");
                None
            }
        };
        Self::from_parts(codec, store, config.residency_threshold)
    }

    /// Creates a policy from `config`, failing if the backing store cannot be opened.
    pub fn try_new(codec: C, config: PolicyConfig) -> Result<Self, PolicyError> {
        let store = Self::open_store(&config).map_err(PolicyError::StorageOpen)?;
        Ok(Self::from_parts(codec, store, config.residency_threshold))
    }

    /// Creates a memory-only policy: collections are never swapped out.
    pub fn allocated(codec: C) -> Self {
        Self::from_parts(codec, None, ResidencyThreshold::Unbounded)
    }

    /// Creates a policy swapping to `backend`.
    pub fn with_backend<B>(codec: C, backend: B, threshold: impl Into<ResidencyThreshold>) -> Self
    where
        B: SwapBackend + 'static,
    {
        Self::from_parts(codec, Some(Box::new(backend)), threshold.into())
    }

    fn from_parts(
        codec: C,
        store: Option<Box<dyn SwapBackend>>,
        threshold: ResidencyThreshold,
    ) -> Self {
        Self {
            codec,
            store,
            threshold: AtomicUsize::new(threshold.limit().unwrap_or(0)),
            chain: Mutex::new(LruChain::new()),
            head: AtomicUsize::new(NO_HEAD),
            overflowed: AtomicBool::new(false),
        }
    }

    fn open_store(config: &PolicyConfig) -> Result<Option<Box<dyn SwapBackend>>, StorageError> {
        if !config.is_swapping_enabled() {
            return Ok(None);
        }

        let backend = match &config.backing_path {
            Some(path) => FileBackend::create(path)?,
            None => FileBackend::temporary()?,
        };
        Ok(Some(Box::new(backend)))
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Returns `true` if a backing store is open.
    pub fn is_swapping_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn residency_threshold(&self) -> ResidencyThreshold {
        ResidencyThreshold::from(self.threshold.load(Ordering::Relaxed))
    }

    /// Changes the residency threshold.
    ///
    /// The new bound is restored by the next touch, or by
    /// [`enforce_threshold`](Self::enforce_threshold). It has no effect on a
    /// policy without a backing store.
    pub fn set_residency_threshold(&self, threshold: impl Into<ResidencyThreshold>) {
        let limit = threshold.into().limit().unwrap_or(0);
        self.threshold.store(limit, Ordering::Relaxed);
    }

    /// Number of collections linked into the LRU chain.
    ///
    /// Always 0 when swapping is disabled: the chain is not maintained.
    pub fn resident_count(&self) -> usize {
        self.chain.lock().len()
    }

    /// Resident collections from most to least recently used.
    pub fn resident_ids(&self) -> Vec<CollectionId> {
        self.chain.lock().iter_ids().collect()
    }

    /// Bytes appended to the backing store so far.
    pub fn store_len(&self) -> u64 {
        self.store.as_ref().map_or(0, |store| store.len())
    }

    /// Flushes the backing store to disk.
    pub fn sync(&self) -> Result<(), PolicyError> {
        if let Some(store) = &self.store {
            store.sync()?;
        }
        Ok(())
    }

    /// Evicts least recently used collections until the threshold holds.
    pub fn enforce_threshold(&self) -> Result<(), PolicyError> {
        let Some(store) = self.store.as_deref() else {
            return Ok(());
        };

        let mut chain = self.chain.lock();
        let result = self.evict_overflow(&mut chain, store, None);
        self.sync_head(&chain);
        result
    }

    /// Evicts the collections a previous eviction skipped because they were
    /// pinned. Does nothing if no eviction fell short.
    pub(crate) fn settle(&self) -> Result<(), PolicyError> {
        if !self.overflowed.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.enforce_threshold()
    }

    pub(crate) fn register(&self, body: Body<C::Member>) -> CollectionId {
        self.chain.lock().insert(body)
    }

    pub(crate) fn unregister(&self, id: CollectionId) {
        let mut chain = self.chain.lock();
        chain.remove(id);
        self.sync_head(&chain);
    }

    /// Makes a collection the most recently used one and brings its records
    /// into memory.
    ///
    /// Returns the collection's records, locked. Other collections may be
    /// evicted on the way; if writing them fails, the error is returned and
    /// the chain is left over the threshold but consistent.
    pub(crate) fn touch<'a>(
        &self,
        id: CollectionId,
        body: &'a Mutex<Residency<C::Member>>,
    ) -> Result<MappedMutexGuard<'a, Vec<C::Member>>, PolicyError> {
        let Some(store) = self.store.as_deref() else {
            // no backing store, records are always in memory
            return Self::resident(id, body.lock());
        };

        if self.head.load(Ordering::Acquire) == id.get() {
            let residency = body.lock();
            if residency.is_resident() {
                return Self::resident(id, residency);
            }
        }

        let mut chain = self.chain.lock();
        let was_linked = chain.move_to_front(id);
        self.sync_head(&chain);
        trace!(collection = %id, was_linked, "touch");

        if let Err(err) = self.evict_overflow(&mut chain, store, Some(id)) {
            if !was_linked {
                chain.unlink(id);
                self.sync_head(&chain);
            }
            return Err(err);
        }

        let mut residency = body.lock();
        drop(chain);

        if let Some(image) = residency.image() {
            match self.swap_in(store, image) {
                Ok(records) => {
                    debug!(collection = %id, count = image.count, offset = image.offset, "swapped in");
                    *residency = Residency::Resident(records);
                }
                Err(err) => {
                    drop(residency);
                    self.rollback(id);
                    return Err(err);
                }
            }
        }

        Self::resident(id, residency)
    }

    /// Reads the records of a collection that will not be linked again.
    pub(crate) fn restore_image(
        &self,
        id: CollectionId,
        image: SwapImage,
    ) -> Result<Vec<C::Member>, PolicyError> {
        let store = self.store.as_deref().ok_or(PolicyError::NotResident(id))?;
        self.swap_in(store, image)
    }

    fn resident(
        id: CollectionId,
        residency: MutexGuard<'_, Residency<C::Member>>,
    ) -> Result<MappedMutexGuard<'_, Vec<C::Member>>, PolicyError> {
        MutexGuard::try_map(residency, Residency::records_mut)
            .map_err(|_| PolicyError::NotResident(id))
    }

    fn evict_overflow(
        &self,
        chain: &mut LruChain<Body<C::Member>>,
        store: &dyn SwapBackend,
        protected: Option<CollectionId>,
    ) -> Result<(), PolicyError> {
        let threshold = self.residency_threshold();
        let mut candidate = chain.tail();

        while threshold.is_exceeded_by(chain.len()) {
            let Some(victim) = candidate else {
                trace!(resident = chain.len(), "every eviction candidate is pinned");
                break;
            };
            candidate = chain.prev(victim);
            if protected == Some(victim) {
                continue;
            }
            let Some(body) = chain.get(victim).cloned() else {
                continue;
            };
            // a locked collection is being used right now
            let Some(mut residency) = body.try_lock() else {
                trace!(collection = %victim, "skipping pinned collection");
                continue;
            };

            if let Residency::Resident(records) = &*residency {
                let image = self.swap_out(store, records)?;
                debug!(
                    collection = %victim,
                    count = image.count,
                    offset = image.offset,
                    len = image.len,
                    "evicted"
                );
                // persisted, so members are dropped without `destroy`
                *residency = Residency::Evicted(image);
            }
            drop(residency);
            chain.unlink(victim);
        }

        self.overflowed
            .store(threshold.is_exceeded_by(chain.len()), Ordering::Relaxed);
        Ok(())
    }

    fn swap_out(
        &self,
        store: &dyn SwapBackend,
        records: &[C::Member],
    ) -> Result<SwapImage, PolicyError> {
        let mut image = Vec::with_capacity(records.len() * self.codec.record_size());
        for member in records {
            self.codec
                .dispose(member, &mut image)
                .map_err(StorageError::Io)?;
        }

        let offset = store.append(&image)?;
        Ok(SwapImage {
            offset,
            len: image.len(),
            count: records.len(),
        })
    }

    fn swap_in(
        &self,
        store: &dyn SwapBackend,
        image: SwapImage,
    ) -> Result<Vec<C::Member>, PolicyError> {
        let mut bytes = vec![0u8; image.len];
        store.read_at(image.offset, &mut bytes)?;

        let mut input = bytes.as_slice();
        let mut records = Vec::with_capacity(image.count);
        for _ in 0..image.count {
            let member = self
                .codec
                .restore(&mut input)
                .map_err(|source| PolicyError::Restore {
                    count: image.count,
                    source,
                })?;
            records.push(member);
        }

        Ok(records)
    }

    // a failed swap-in must not leave an evicted collection in the chain
    fn rollback(&self, id: CollectionId) {
        let mut chain = self.chain.lock();
        let evicted = chain
            .get(id)
            .is_some_and(|body| !body.lock().is_resident());
        if evicted {
            chain.unlink(id);
            self.sync_head(&chain);
        }
    }

    fn sync_head(&self, chain: &LruChain<Body<C::Member>>) {
        let head = chain.head().map_or(NO_HEAD, |id| id.get());
        self.head.store(head, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let chain = self.chain.lock();
        chain.check_invariants();
        for id in chain.iter_ids() {
            let body = chain.get(id).unwrap();
            if let Some(residency) = body.try_lock() {
                assert!(residency.is_resident(), "evicted collection {id} in chain");
            }
        }
    }
}
