use crate::buffer::storage::create_with_retry;
use crate::buffer::{BackingStorage, MapPolicy, StorageError, StorageKey, UsageFlags};
use crate::error::LockError;

/// Delegated backend: every lock maps a sub-range of the storage region and
/// leaves reclamation to the storage object's map policy.
pub(super) struct DelegatedRing {
    storage: Box<dyn BackingStorage>,
    region: Option<StorageKey>,
    usage: UsageFlags,
    capacity: usize,
    mapped: bool,
}

impl DelegatedRing {
    pub(super) fn new(
        storage: Box<dyn BackingStorage>,
        usage: UsageFlags,
        capacity: usize,
    ) -> Self {
        Self {
            storage,
            region: None,
            usage,
            capacity,
            mapped: false,
        }
    }

    pub(super) fn is_allocated(&self) -> bool {
        self.region.is_some()
    }

    pub(super) fn ensure_allocated(&mut self, name: &str) -> Result<(), LockError> {
        if self.region.is_none() {
            let key = create_with_retry(self.storage.as_mut(), self.capacity, self.usage, name)?;
            log::debug!("{}: created {} byte region", name, self.capacity);
            self.region = Some(key);
        }
        Ok(())
    }

    pub(super) fn map(
        &mut self,
        offset: usize,
        len: usize,
        policy: MapPolicy,
    ) -> Result<(), LockError> {
        let key = self
            .region
            .ok_or(StorageError::UnknownRegion)?;
        self.storage.map_region(key, offset, len, policy)?;
        self.mapped = true;
        Ok(())
    }

    pub(super) fn bytes(&self) -> Option<&[u8]> {
        self.storage.mapped_bytes(self.region?)
    }

    pub(super) fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        self.storage.mapped_bytes_mut(self.region?)
    }

    pub(super) fn unmap(&mut self) {
        if let Some(key) = self.region
            && self.mapped
        {
            self.storage.unmap_region(key);
            self.mapped = false;
        }
    }
}

impl Drop for DelegatedRing {
    fn drop(&mut self) {
        self.unmap();
        if let Some(key) = self.region.take() {
            self.storage.destroy(key);
        }
    }
}
