use std::thread::{self, ThreadId};

use bytemuck::Pod;

use crate::buffer::{LockMode, LockResult, RingAllocator, StagingBuffer};
use crate::error::LockError;
use crate::stats::RingStats;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum LockTarget {
    Ring,
    Staging,
}

/// One buffer as callers see it: the ring plus the staging buffer that
/// stands in for it while the owning thread is elsewhere.
pub struct BufferRegion {
    ring: RingAllocator,
    staging: Option<StagingBuffer>,
    owner: ThreadId,
    locked: Option<LockTarget>,
}

impl BufferRegion {
    /// Owned by the calling thread.
    pub fn new(ring: RingAllocator) -> Self {
        Self::with_owner(ring, thread::current().id())
    }

    pub fn with_owner(ring: RingAllocator, owner: ThreadId) -> Self {
        Self {
            ring,
            staging: None,
            owner,
            locked: None,
        }
    }

    pub fn ring(&self) -> &RingAllocator {
        &self.ring
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub fn is_locked(&self) -> bool {
        self.locked.is_some()
    }

    pub fn has_staged_data(&self) -> bool {
        self.staging.is_some()
    }

    pub fn stats(&self) -> RingStats {
        self.ring.stats()
    }

    pub fn lock(&mut self, num_elements: usize, mode: LockMode) -> Result<LockResult, LockError> {
        if self.locked.is_some() {
            return Err(self.ring.misuse(LockError::AlreadyLocked));
        }

        if self.is_owner_thread() {
            self.handle_late_creation()?;
            let result = self.ring.lock(num_elements, mode)?;
            self.locked = Some(LockTarget::Ring);
            return Ok(result);
        }

        let result = self.lock_staged(num_elements, mode)?;
        self.locked = Some(LockTarget::Staging);
        Ok(result)
    }

    fn lock_staged(
        &mut self,
        num_elements: usize,
        mode: LockMode,
    ) -> Result<LockResult, LockError> {
        if mode == LockMode::ReadOnly {
            return Err(self.ring.misuse(LockError::ReadOnlyOffThread));
        }
        self.ring.check_request(num_elements, mode)?;

        let staging = match self.staging.take() {
            Some(staging) => staging,
            None => self.create_staging()?,
        };
        let result = self.staging.insert(staging).lock(num_elements, mode);
        let stats = self.ring.stats_mut();
        stats.locks += 1;
        stats.staged_locks += 1;
        Ok(result)
    }

    fn create_staging(&mut self) -> Result<StagingBuffer, LockError> {
        let created = StagingBuffer::new(
            self.ring.capacity_bytes(),
            self.ring.element_size(),
            self.ring.granularity(),
            self.ring.write_cursor(),
            self.ring.flush_pending(),
        );

        match created {
            Ok(staging) => {
                log::debug!(
                    "{}: staging {} bytes for thread {:?}",
                    self.ring.name(),
                    staging.capacity_bytes(),
                    thread::current().name().unwrap_or("unnamed")
                );
                Ok(staging)
            }
            Err(e) => {
                log::warn!("{}: {}", self.ring.name(), e);
                self.ring.stats_mut().failed_locks += 1;
                Err(e.into())
            }
        }
    }

    pub fn locked_bytes_mut(&mut self) -> Option<&mut [u8]> {
        match self.locked? {
            LockTarget::Ring => self.ring.locked_bytes_mut(),
            LockTarget::Staging => self.staging.as_mut()?.locked_bytes_mut(),
        }
    }

    pub fn locked_bytes(&self) -> Option<&[u8]> {
        match self.locked? {
            LockTarget::Ring => self.ring.locked_bytes(),
            LockTarget::Staging => self.staging.as_ref()?.locked_bytes(),
        }
    }

    pub fn unlock(&mut self, num_written: usize) {
        match self.locked.take() {
            Some(LockTarget::Ring) => self.ring.unlock(num_written),
            Some(LockTarget::Staging) => {
                let Some(staging) = self.staging.as_mut() else {
                    return;
                };
                let locked =
                    staging.locked_bytes().map_or(0, |b| b.len()) / self.ring.element_size();
                if num_written > locked {
                    self.ring.misuse(LockError::UnlockOverrun {
                        written: num_written,
                        locked,
                    });
                }
                staging.unlock(num_written);
            }
            None => log::trace!("{}: unlock without an open lock", self.ring.name()),
        }
    }

    /// Lock, copy `data` to the start of the locked region, unlock.
    pub fn write<T: Pod>(&mut self, data: &[T], mode: LockMode) -> Result<LockResult, LockError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let element_size = self.ring.element_size();
        if bytes.len() % element_size != 0 {
            return Err(self.ring.misuse(LockError::PartialElement {
                bytes: bytes.len(),
                element_size,
            }));
        }

        let count = bytes.len() / element_size;
        let result = self.lock(count, mode)?;
        if let Some(target) = self.locked_bytes_mut() {
            target.copy_from_slice(bytes);
        }
        self.unlock(count);
        Ok(result)
    }

    /// Replays staged writes into the ring. Must run on the owning thread.
    pub fn handle_late_creation(&mut self) -> Result<(), LockError> {
        if self.locked == Some(LockTarget::Staging) {
            log::warn!(
                "{}: late creation skipped while a staged lock is open",
                self.ring.name()
            );
            return Ok(());
        }
        let Some(staging) = self.staging.take() else {
            return Ok(());
        };

        let _span = tracing::debug_span!("late_creation", buffer = %self.ring.name()).entered();
        #[cfg(feature = "tracing")]
        let _zone = tracy_client::span!("BufferRegion::handle_late_creation");

        if let Some(plan) = staging.plan() {
            let result = self
                .ring
                .lock(plan.element_count, plan.mode)
                .map_err(|e| LockError::LateCreation(Box::new(e)))?;

            if result.byte_offset != plan.expected_offset {
                self.ring.unlock(0);
                let e = LockError::StagingMismatch {
                    expected: plan.expected_offset,
                    actual: result.byte_offset,
                };
                log::error!("{}: {}", self.ring.name(), e);
                return Err(e);
            }

            let source = staging.bytes(plan.bytes.clone());
            if let Some(target) = self.ring.locked_bytes_mut() {
                target[..source.len()].copy_from_slice(source);
            }
            self.ring.unlock(plan.element_count);

            log::debug!(
                "{}: late creation copied {} bytes ({:?})",
                self.ring.name(),
                plan.bytes.len(),
                plan.mode
            );
        }

        if staging.has_pending_flush() {
            self.ring.flush_at_next_lock();
        }
        self.ring.stats_mut().late_creations += 1;
        Ok(())
    }

    pub fn mark_used_in_rendering(&mut self) {
        if self.staging.is_some() {
            log::warn!(
                "{}: marked used with staged data still pending late creation",
                self.ring.name()
            );
        }
        self.ring.mark_used_in_rendering();
    }

    pub fn flush_at_next_lock(&mut self) {
        if !self.ring.is_dynamic() {
            return;
        }
        match &mut self.staging {
            Some(staging) => staging.request_flush(),
            None => self.ring.flush_at_next_lock(),
        }
    }

    pub fn room_remaining(&self) -> usize {
        match &self.staging {
            Some(staging) => staging.room_remaining(),
            None => self.ring.room_remaining(),
        }
    }

    pub fn has_enough_room(&self, num_elements: usize) -> bool {
        num_elements <= self.room_remaining()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::buffer::{BackendKind, BufferSpec, HostStorage, MemoryBudget, RingConfig};
    use crate::fence::testing::ScriptedTimeline;
    use crate::fence::{FenceContext, FenceValue};

    fn region(spec: BufferSpec) -> BufferRegion {
        let fences = FenceContext::without_sub_passes(Arc::new(ScriptedTimeline::new(1)));
        BufferRegion::new(RingAllocator::new(&spec, Box::new(HostStorage::default()), &fences))
    }

    fn quiet(spec: BufferSpec) -> BufferSpec {
        spec.ring(RingConfig::default().assert_on_misuse(false))
    }

    #[test]
    fn owner_thread_writes_straight_to_ring() {
        let mut region = region(quiet(BufferSpec::vertices(4, 16)));
        let result = region.write(&[1u32, 2, 3], LockMode::Append).unwrap();

        assert!(!result.staged);
        assert!(!region.has_staged_data());
        assert_eq!(region.ring().write_cursor(), 12);
    }

    #[test]
    fn off_thread_writes_are_staged_then_replayed() {
        let mut region = region(quiet(
            BufferSpec::vertices(4, 16).backend(BackendKind::SelfManaged),
        ));
        region.write(&[9u32, 9], LockMode::Append).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                let staged = region.write(&[5u32, 6, 7], LockMode::Append).unwrap();
                assert!(staged.staged);
                assert_eq!(staged.element_offset, 2);
                assert!(region.lock(1, LockMode::ReadOnly).is_err());
            });
        });
        assert!(region.has_staged_data());
        assert_eq!(region.ring().write_cursor(), 8);

        region.handle_late_creation().unwrap();
        assert!(!region.has_staged_data());
        assert_eq!(region.ring().write_cursor(), 20);
        assert_eq!(region.stats().late_creations, 1);

        region.lock(5, LockMode::ReadOnly).unwrap();
        let expected: Vec<u8> = bytemuck::cast_slice(&[9u32, 9, 5, 6, 7]).to_vec();
        assert_eq!(region.locked_bytes(), Some(&expected[..]));
        region.unlock(0);
    }

    #[test]
    fn replayed_staging_stays_fenced_across_the_next_lap() {
        let timeline = Arc::new(ScriptedTimeline::new(1));
        let fences = FenceContext::without_sub_passes(timeline.clone());
        let spec = BufferSpec::vertices(1, 100)
            .backend(BackendKind::SelfManaged)
            .ring(RingConfig::default().alignment(1).assert_on_misuse(false));
        let mut region =
            BufferRegion::new(RingAllocator::new(&spec, Box::new(HostStorage::default()), &fences));

        region.write(&[1u8; 60], LockMode::Append).unwrap();
        region.mark_used_in_rendering();
        timeline.set_current(2);

        std::thread::scope(|s| {
            s.spawn(|| region.write(&[2u8; 30], LockMode::Append).unwrap());
        });

        // Replays [60, 90), then wraps for the owner's own write.
        let own = region.write(&[3u8; 20], LockMode::Append).unwrap();
        assert_eq!(own.byte_offset, 0);
        region.mark_used_in_rendering();
        let ledger = region.ring().ledger_snapshot();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.iter().all(|entry| entry.fence == Some(FenceValue(2))));

        let next = region.write(&[4u8; 50], LockMode::Append).unwrap();
        assert_eq!(next.byte_offset, 20);
        assert_eq!(timeline.waits(), vec![FenceValue(1), FenceValue(2)]);
        assert_eq!(region.stats().unfenced_reclaims, 0);
    }

    #[test]
    fn flush_requested_while_staging_reaches_the_ring() {
        let mut region = region(quiet(BufferSpec::vertices(4, 16)));
        region.write(&[1u32], LockMode::Append).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                region.write(&[2u32], LockMode::Append).unwrap();
                region.flush_at_next_lock();
            });
        });

        region.handle_late_creation().unwrap();
        assert!(region.ring().flush_pending());
        assert!(region.write(&[3u32], LockMode::Append).unwrap().discarded);
    }

    #[test]
    fn partial_elements_are_refused() {
        let mut region = region(quiet(BufferSpec::vertices(12, 4)));
        assert_eq!(
            region.write(&[0u32, 1], LockMode::Append),
            Err(LockError::PartialElement {
                bytes: 8,
                element_size: 12
            })
        );
        assert!(!region.is_locked());
    }

    #[test]
    fn late_creation_failure_is_fatal() {
        let spec = quiet(BufferSpec::vertices(4, 16));
        let fences = FenceContext::without_sub_passes(Arc::new(ScriptedTimeline::new(1)));
        let storage = HostStorage::new(MemoryBudget::with_limit(16));
        let mut region = BufferRegion::new(RingAllocator::new(&spec, Box::new(storage), &fences));

        std::thread::scope(|s| {
            s.spawn(|| region.write(&[1u32; 4], LockMode::Append).unwrap());
        });

        let err = region.handle_late_creation().unwrap_err();
        assert_eq!(err.severity(), crate::error::Severity::Fatal);
    }
}
