use std::thread::{self, ThreadId};

use anyhow::Context;
use bytemuck::Pod;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::binding::DeviceBindingCache;
use crate::buffer::{
    BufferKey, BufferRegion, BufferSpec, LockMode, LockResult, RingAllocator, StorageProvider,
};
use crate::error::LockError;
use crate::fence::FenceContext;
use crate::stats::RingStats;

/// Owns every buffer created on one rendering context.
pub struct BufferManager {
    buffers: SlotMap<BufferKey, BufferRegion>,
    provider: Box<dyn StorageProvider>,
    fences: FenceContext,
    owner: ThreadId,
}

impl BufferManager {
    /// The calling thread becomes the owning thread of every buffer.
    pub fn new(provider: Box<dyn StorageProvider>, fences: FenceContext) -> Self {
        Self {
            buffers: SlotMap::with_key(),
            provider,
            fences,
            owner: thread::current().id(),
        }
    }

    #[inline]
    pub fn buffer(&self, key: BufferKey) -> Option<&BufferRegion> {
        self.buffers.get(key)
    }

    #[inline]
    pub fn buffer_mut(&mut self, key: BufferKey) -> Option<&mut BufferRegion> {
        self.buffers.get_mut(key)
    }

    #[inline]
    fn region(&mut self, key: BufferKey) -> Result<&mut BufferRegion, LockError> {
        self.buffers.get_mut(key).ok_or(LockError::UnknownBuffer)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = BufferKey> + '_ {
        self.buffers.keys()
    }

    /// Backing memory is not touched until the first lock.
    pub fn create_buffer(&mut self, spec: BufferSpec) -> BufferKey {
        let storage = self.provider.create_storage(&spec);
        let ring = RingAllocator::new(&spec, storage, &self.fences);
        let key = self
            .buffers
            .insert(BufferRegion::with_owner(ring, self.owner));
        log::debug!("BufferManager: created {} as {:?}", spec.name(), key);
        key
    }

    pub fn destroy_buffer(&mut self, key: BufferKey, cache: &mut DeviceBindingCache) -> bool {
        cache.unbind(key);
        match self.buffers.remove(key) {
            Some(region) => {
                if region.has_staged_data() {
                    log::warn!(
                        "BufferManager: {} destroyed with staged data",
                        region.ring().name()
                    );
                }
                true
            }
            None => false,
        }
    }

    /// A buffer is unbound before it is locked.
    pub fn lock(
        &mut self,
        key: BufferKey,
        num_elements: usize,
        mode: LockMode,
        cache: &mut DeviceBindingCache,
    ) -> Result<LockResult, LockError> {
        if cache.unbind(key) {
            log::trace!("BufferManager: unbound {:?} for locking", key);
        }
        self.region(key)?.lock(num_elements, mode)
    }

    pub fn unlock(&mut self, key: BufferKey, num_written: usize) {
        if let Some(region) = self.buffers.get_mut(key) {
            region.unlock(num_written);
        }
    }

    pub fn write<T: Pod>(
        &mut self,
        key: BufferKey,
        data: &[T],
        mode: LockMode,
        cache: &mut DeviceBindingCache,
    ) -> Result<LockResult, LockError> {
        cache.unbind(key);
        self.region(key)?.write(data, mode)
    }

    pub fn mark_used_in_rendering(&mut self, key: BufferKey) {
        if let Some(region) = self.buffers.get_mut(key) {
            region.mark_used_in_rendering();
        }
    }

    /// Called after every draw: whatever is bound was just read.
    pub fn mark_bound_used(&mut self, cache: &DeviceBindingCache) {
        for key in cache.bound_keys() {
            self.mark_used_in_rendering(key);
        }
    }

    /// Every dynamic buffer discards on its next lock.
    pub fn flush_at_frame_start(&mut self) {
        for (_, region) in self.buffers.iter_mut() {
            region.flush_at_next_lock();
        }
    }

    /// Replays staged writes for every buffer. Must run on the owning thread.
    pub fn handle_late_creation(&mut self) -> anyhow::Result<()> {
        if thread::current().id() != self.owner {
            anyhow::bail!("late creation must run on the thread that owns the buffers");
        }

        let staged: SmallVec<[BufferKey; 8]> = self
            .buffers
            .iter()
            .filter(|(_, region)| region.has_staged_data())
            .map(|(key, _)| key)
            .collect();

        for key in staged {
            let region = self.region(key)?;
            region
                .handle_late_creation()
                .with_context(|| format!("late creation failed for {}", region.ring().name()))?;
        }
        Ok(())
    }

    pub fn stats(&self) -> RingStats {
        let mut total = RingStats::default();
        for (_, region) in self.buffers.iter() {
            total.merge(&region.stats());
        }
        total
    }
}
