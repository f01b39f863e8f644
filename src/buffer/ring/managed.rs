use std::ops::Range;
use std::time::{Duration, Instant};

use crate::buffer::ledger::{Ledger, LedgerEntry};
use crate::buffer::storage::create_with_retry;
use crate::buffer::{
    BackingStorage, MapPolicy, RingConfig, StorageKey, SubPassPolicy, UsageFlags,
};
use crate::error::LockError;
use crate::fence::{EpochTag, FenceContext, FenceValue};
use crate::stats::RingStats;

use super::align_up;

/// Self-managed backend: one persistently mapped region plus a ledger of
/// the ranges the consumer may still be reading.
pub(super) struct ManagedRing {
    storage: Box<dyn BackingStorage>,
    region: Option<StorageKey>,
    usage: UsageFlags,
    capacity: usize,
    granularity: usize,
    ledger: Ledger,
    /// Everything in `[cursor, free_end)` is known to be unused.
    free_end: usize,
    fences: FenceContext,
    policy: SubPassPolicy,
    stall_threshold: Duration,
}

impl ManagedRing {
    pub(super) fn new(
        storage: Box<dyn BackingStorage>,
        usage: UsageFlags,
        capacity: usize,
        granularity: usize,
        config: &RingConfig,
        fences: FenceContext,
    ) -> Self {
        Self {
            storage,
            region: None,
            usage,
            capacity,
            granularity,
            ledger: Ledger::with_capacity(config.ledger_capacity),
            free_end: capacity,
            fences,
            policy: config.sub_pass_policy,
            stall_threshold: config.stall_threshold,
        }
    }

    pub(super) fn granularity(&self) -> usize {
        self.granularity
    }

    pub(super) fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub(super) fn free_end(&self) -> usize {
        self.free_end
    }

    pub(super) fn is_allocated(&self) -> bool {
        self.region.is_some()
    }

    pub(super) fn ensure_allocated(&mut self, name: &str) -> Result<(), LockError> {
        if self.region.is_some() {
            return Ok(());
        }

        let key = create_with_retry(self.storage.as_mut(), self.capacity, self.usage, name)?;
        if let Err(e) = self
            .storage
            .map_region(key, 0, self.capacity, MapPolicy::Persistent)
        {
            self.storage.destroy(key);
            return Err(e.into());
        }

        log::debug!("{}: mapped {} bytes persistently", name, self.capacity);
        self.region = Some(key);
        Ok(())
    }

    pub(super) fn bytes(&self, range: Range<usize>) -> Option<&[u8]> {
        let key = self.region?;
        self.storage.mapped_bytes(key)?.get(range)
    }

    pub(super) fn bytes_mut(&mut self, range: Range<usize>) -> Option<&mut [u8]> {
        let key = self.region?;
        self.storage.mapped_bytes_mut(key)?.get_mut(range)
    }

    /// Makes `[cursor, cursor + size)` safe to write, wrapping to zero when
    /// asked to discard or when the request does not fit before the end.
    pub(super) fn block_until_unused(
        &mut self,
        cursor: &mut usize,
        size: usize,
        discard: bool,
        stats: &mut RingStats,
        name: &str,
    ) {
        let must_wrap = (discard || *cursor + size > self.capacity) && *cursor != 0;
        if !must_wrap && *cursor + size <= self.free_end {
            return;
        }

        let _span = tracing::trace_span!("block_until_unused", buffer = %name, size).entered();

        if must_wrap {
            let old_cursor = *cursor;

            // The tail past the cursor is abandoned; the newest entry absorbs
            // it, together with the fences of last lap's leftovers there.
            if let Some(back) = self.ledger.back().copied()
                && back.start < old_cursor
            {
                let mut tail = back;
                tail.end = self.capacity;
                while let Some(stale) = self
                    .ledger
                    .front()
                    .copied()
                    .filter(|front| front.start >= old_cursor)
                {
                    tail.absorb(&stale);
                    self.ledger.pop_front();
                }
                if let Some(back) = self.ledger.back_mut() {
                    *back = tail;
                }
            }

            self.free_end = 0;
            *cursor = 0;
            stats.wraps += 1;
            log::trace!("{}: wrapped at byte {}", name, old_cursor);
        }

        let mut wait_for: Option<(FenceValue, Option<EpochTag>)> = None;
        while self.free_end < *cursor + size {
            let Some(front) = self.ledger.front().copied() else {
                self.free_end = self.capacity;
                break;
            };
            if front.start < *cursor {
                // Only entries behind the cursor remain: the tail is free.
                self.free_end = self.capacity;
                break;
            }

            self.ledger.pop_front();
            self.free_end = front.end;

            let mut covering = front;
            if front.pending {
                // Not yet marked: the next marked entry's fence covers it.
                let later = self
                    .ledger
                    .iter()
                    .find(|entry| !entry.pending && entry.fence.is_some());
                match later {
                    Some(entry) => covering.absorb(entry),
                    None => {
                        log::warn!(
                            "{}: reclaiming [{}, {}) which was never marked used in rendering",
                            name,
                            front.start,
                            front.end
                        );
                        stats.unfenced_reclaims += 1;
                    }
                }
            }

            if let Some(fence) = covering.fence
                && wait_for.is_none_or(|(latest, _)| fence >= latest)
            {
                wait_for = Some((fence, covering.epoch));
            }
        }

        if let Some((fence, epoch)) = wait_for {
            self.wait_for_fence(fence, epoch, stats, name);
        }
    }

    fn wait_for_fence(
        &self,
        fence: FenceValue,
        epoch: Option<EpochTag>,
        stats: &mut RingStats,
        name: &str,
    ) {
        let timeline = &self.fences.timeline;
        if timeline.is_fence_satisfied(fence) {
            return;
        }

        let sub_pass = &self.fences.sub_pass;
        if self.policy == SubPassPolicy::EndEarly
            && sub_pass.is_in_open_sub_pass()
            && epoch.is_some()
            && epoch == sub_pass.current_sub_pass_epoch()
        {
            log::debug!("{}: {} belongs to the open sub-pass, ending it early", name, fence);
            sub_pass.end_current_sub_pass_early();
            stats.early_sub_pass_ends += 1;
        }

        let _span = tracing::debug_span!("ring_stall", buffer = %name, %fence).entered();
        #[cfg(feature = "tracing")]
        let _zone = tracy_client::span!("ManagedRing::wait_for_fence");

        let started = Instant::now();
        timeline.block_on_fence(fence);
        let waited = started.elapsed();

        stats.stall_time += waited;
        if waited >= self.stall_threshold {
            stats.stalls += 1;
            log::warn!(
                "{}: stalled {:.2}ms waiting for {}",
                name,
                waited.as_secs_f64() * 1000.0,
                fence
            );
        }
    }

    /// Records `[start, start + bytes)` as written and returns the new cursor.
    pub(super) fn commit(&mut self, start: usize, bytes: usize) -> usize {
        if bytes == 0 {
            return start;
        }
        let end = align_up(start + bytes, self.granularity).min(self.capacity);
        self.ledger.push(LedgerEntry::new(start, end));

        #[cfg(feature = "tracing")]
        tracy_client::plot!("ledger depth", self.ledger.len() as f64);

        end
    }

    pub(super) fn mark_used(&mut self, name: &str) {
        let fence = self.fences.timeline.current_fence();
        let epoch = self.fences.sub_pass.current_sub_pass_epoch();

        let stamped = self.ledger.stamp_pending(fence, epoch);
        if stamped == 0 {
            log::trace!("{}: marked used with nothing committed", name);
        } else if stamped > 1 {
            log::trace!("{}: {} entries stamped with {}", name, stamped, fence);
        }
    }
}

impl Drop for ManagedRing {
    fn drop(&mut self) {
        if let Some(key) = self.region.take() {
            self.storage.unmap_region(key);
            self.storage.destroy(key);
        }
    }
}
