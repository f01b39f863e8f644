//! Boundary to the object that actually owns consumer-visible memory.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use slotmap::SlotMap;
use thiserror::Error;

use crate::buffer::{BufferSpec, StorageKey};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    #[error("could not allocate a {bytes}-byte staging block")]
    StagingAllocation { bytes: usize },

    #[error("unknown storage region")]
    UnknownRegion,

    #[error("region is already mapped")]
    AlreadyMapped,

    #[error("range {offset}..{end} exceeds the {size}-byte region")]
    OutOfRange {
        offset: usize,
        end: usize,
        size: usize,
    },
}

/// How a map request may treat data the consumer could still be reading.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MapPolicy {
    /// Previous contents are abandoned; the driver hands out fresh memory.
    Discard,
    /// Caller promises not to touch anything already submitted.
    NoOverwrite,
    /// Plain write with no reclamation hint (static buffers).
    Overwrite,
    ReadOnly,
    /// Whole region mapped once and left mapped.
    Persistent,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct UsageFlags {
    pub dynamic: bool,
    pub write_only: bool,
}

impl UsageFlags {
    pub fn for_spec(spec: &BufferSpec) -> Self {
        Self {
            dynamic: spec.is_dynamic(),
            write_only: true,
        }
    }
}

pub trait BackingStorage: Send {
    fn create_region(
        &mut self,
        size_bytes: usize,
        usage: UsageFlags,
    ) -> Result<StorageKey, StorageError>;

    fn map_region(
        &mut self,
        key: StorageKey,
        offset: usize,
        len: usize,
        policy: MapPolicy,
    ) -> Result<(), StorageError>;

    /// Bytes of the current mapping, starting at the mapped offset.
    fn mapped_bytes(&self, key: StorageKey) -> Option<&[u8]>;

    fn mapped_bytes_mut(&mut self, key: StorageKey) -> Option<&mut [u8]>;

    fn unmap_region(&mut self, key: StorageKey);

    fn destroy(&mut self, key: StorageKey);

    /// Releases whatever the storage can give back before a retry.
    fn evict_unused(&mut self) {}
}

/// Creates a region, evicting and retrying once when memory runs out.
pub(crate) fn create_with_retry(
    storage: &mut dyn BackingStorage,
    size_bytes: usize,
    usage: UsageFlags,
    name: &str,
) -> Result<StorageKey, StorageError> {
    match storage.create_region(size_bytes, usage) {
        Err(StorageError::OutOfMemory { .. }) => {
            log::debug!("{}: out of memory, evicting and retrying", name);
            storage.evict_unused();
            storage.create_region(size_bytes, usage).inspect_err(|e| {
                log::warn!("{}: failed to create {} byte region: {}", name, size_bytes, e);
            })
        }
        other => other,
    }
}

/// Byte budget shared by every region created from one provider.
#[derive(Debug)]
pub struct MemoryBudget {
    limit: Option<usize>,
    used: AtomicUsize,
}

impl MemoryBudget {
    pub fn unlimited() -> Arc<Self> {
        Arc::new(Self {
            limit: None,
            used: AtomicUsize::new(0),
        })
    }

    pub fn with_limit(bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            limit: Some(bytes),
            used: AtomicUsize::new(0),
        })
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    fn charge(&self, bytes: usize) -> Result<(), StorageError> {
        let Some(limit) = self.limit else {
            self.used.fetch_add(bytes, Ordering::AcqRel);
            return Ok(());
        };
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used + bytes <= limit).then_some(used + bytes)
            })
            .map(|_| ())
            .map_err(|used| StorageError::OutOfMemory {
                requested: bytes,
                available: limit.saturating_sub(used),
            })
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

#[derive(Debug, Default)]
pub struct MapCounters {
    pub creates: AtomicUsize,
    pub destroys: AtomicUsize,
    pub discards: AtomicUsize,
    pub no_overwrites: AtomicUsize,
    pub overwrites: AtomicUsize,
    pub read_only: AtomicUsize,
    pub persistent: AtomicUsize,
}

impl MapCounters {
    fn record(&self, policy: MapPolicy) {
        let counter = match policy {
            MapPolicy::Discard => &self.discards,
            MapPolicy::NoOverwrite => &self.no_overwrites,
            MapPolicy::Overwrite => &self.overwrites,
            MapPolicy::ReadOnly => &self.read_only,
            MapPolicy::Persistent => &self.persistent,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, policy: MapPolicy) -> usize {
        match policy {
            MapPolicy::Discard => &self.discards,
            MapPolicy::NoOverwrite => &self.no_overwrites,
            MapPolicy::Overwrite => &self.overwrites,
            MapPolicy::ReadOnly => &self.read_only,
            MapPolicy::Persistent => &self.persistent,
        }
        .load(Ordering::Relaxed)
    }
}

struct HostRegion {
    bytes: Vec<u8>,
    mapping: Option<Range<usize>>,
}

/// Heap-backed storage for running the allocator without a device.
pub struct HostStorage {
    regions: SlotMap<StorageKey, HostRegion>,
    budget: Arc<MemoryBudget>,
    counters: Arc<MapCounters>,
}

impl Default for HostStorage {
    fn default() -> Self {
        Self::new(MemoryBudget::unlimited())
    }
}

impl HostStorage {
    pub fn new(budget: Arc<MemoryBudget>) -> Self {
        Self {
            regions: SlotMap::with_key(),
            budget,
            counters: Arc::default(),
        }
    }

    pub fn with_counters(mut self, counters: Arc<MapCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn counters(&self) -> Arc<MapCounters> {
        self.counters.clone()
    }
}

impl BackingStorage for HostStorage {
    fn create_region(
        &mut self,
        size_bytes: usize,
        _usage: UsageFlags,
    ) -> Result<StorageKey, StorageError> {
        self.budget.charge(size_bytes)?;

        let mut bytes = Vec::new();
        if bytes.try_reserve_exact(size_bytes).is_err() {
            self.budget.release(size_bytes);
            return Err(StorageError::OutOfMemory {
                requested: size_bytes,
                available: 0,
            });
        }
        bytes.resize(size_bytes, 0);

        self.counters.creates.fetch_add(1, Ordering::Relaxed);
        Ok(self.regions.insert(HostRegion {
            bytes,
            mapping: None,
        }))
    }

    fn map_region(
        &mut self,
        key: StorageKey,
        offset: usize,
        len: usize,
        policy: MapPolicy,
    ) -> Result<(), StorageError> {
        let region = self
            .regions
            .get_mut(key)
            .ok_or(StorageError::UnknownRegion)?;
        if region.mapping.is_some() {
            return Err(StorageError::AlreadyMapped);
        }
        let end = offset + len;
        if end > region.bytes.len() {
            return Err(StorageError::OutOfRange {
                offset,
                end,
                size: region.bytes.len(),
            });
        }
        region.mapping = Some(offset..end);
        self.counters.record(policy);
        Ok(())
    }

    fn mapped_bytes(&self, key: StorageKey) -> Option<&[u8]> {
        let region = self.regions.get(key)?;
        let range = region.mapping.clone()?;
        Some(&region.bytes[range])
    }

    fn mapped_bytes_mut(&mut self, key: StorageKey) -> Option<&mut [u8]> {
        let region = self.regions.get_mut(key)?;
        let range = region.mapping.clone()?;
        Some(&mut region.bytes[range])
    }

    fn unmap_region(&mut self, key: StorageKey) {
        if let Some(region) = self.regions.get_mut(key) {
            region.mapping = None;
        }
    }

    fn destroy(&mut self, key: StorageKey) {
        if let Some(region) = self.regions.remove(key) {
            self.budget.release(region.bytes.len());
            self.counters.destroys.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Hands out storage for each new buffer.
pub trait StorageProvider: Send {
    fn create_storage(&mut self, spec: &BufferSpec) -> Box<dyn BackingStorage>;
}

pub struct HostStorageProvider {
    budget: Arc<MemoryBudget>,
    counters: Arc<MapCounters>,
}

impl Default for HostStorageProvider {
    fn default() -> Self {
        Self::new(MemoryBudget::unlimited())
    }
}

impl HostStorageProvider {
    pub fn new(budget: Arc<MemoryBudget>) -> Self {
        Self {
            budget,
            counters: Arc::default(),
        }
    }

    pub fn budget(&self) -> Arc<MemoryBudget> {
        self.budget.clone()
    }

    pub fn counters(&self) -> Arc<MapCounters> {
        self.counters.clone()
    }
}

impl StorageProvider for HostStorageProvider {
    fn create_storage(&mut self, _spec: &BufferSpec) -> Box<dyn BackingStorage> {
        Box::new(HostStorage::new(self.budget.clone()).with_counters(self.counters.clone()))
    }
}
