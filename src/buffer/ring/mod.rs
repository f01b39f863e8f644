//! The ring allocator: lock/unlock state machine over one memory pool.
//!
//! A lock either appends after the last committed byte or discards the
//! whole pool and restarts at offset zero. What a discard costs depends on
//! the backend: the delegated backend hands the request to the storage
//! object's own discard/no-overwrite primitives, the self-managed backend
//! waits on its ledger until the target range is no longer being read.

mod delegated;
mod managed;

use std::ops::Range;

use delegated::DelegatedRing;
use managed::ManagedRing;

use crate::buffer::{
    BackendKind, BackingStorage, BufferSpec, BufferUsage, LedgerEntry, MapPolicy, UsageFlags,
};
use crate::error::{LockError, misuse};
use crate::fence::FenceContext;
use crate::stats::RingStats;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Write after the last committed byte, leaving submitted data alone.
    Append,
    /// Invalidate everything and write from the start.
    Discard,
    /// Read elements `[0, n)` without moving the write cursor.
    ReadOnly,
}

impl LockMode {
    pub fn from_flags(append: bool, read_only: bool) -> Self {
        match (append, read_only) {
            (_, true) => LockMode::ReadOnly,
            (true, false) => LockMode::Append,
            (false, false) => LockMode::Discard,
        }
    }

    pub fn is_write(self) -> bool {
        self != LockMode::ReadOnly
    }
}

/// Where a successful lock placed the caller's elements.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LockResult {
    pub element_offset: usize,
    pub byte_offset: usize,
    pub element_count: usize,
    /// Every offset handed out before this lock is now invalid.
    pub discarded: bool,
    /// The region lives in a staging buffer until late creation.
    pub staged: bool,
}

#[derive(Debug, Copy, Clone)]
struct ActiveLock {
    byte_offset: usize,
    element_count: usize,
    mode: LockMode,
}

/// Whether a write lock of `size` bytes at `cursor` has to restart at zero.
pub(crate) fn needs_discard(
    cursor: usize,
    size: usize,
    capacity: usize,
    mode: LockMode,
    flush_pending: bool,
) -> bool {
    mode == LockMode::Discard || flush_pending || cursor + size > capacity
}

pub(crate) fn align_up(value: usize, granularity: usize) -> usize {
    value.div_ceil(granularity) * granularity
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 { a } else { gcd(b, a % b) }
}

pub(crate) fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}

enum Backend {
    Delegated(DelegatedRing),
    Managed(ManagedRing),
}

pub struct RingAllocator {
    name: String,
    element_size: usize,
    capacity_elements: usize,
    capacity_bytes: usize,
    usage: BufferUsage,
    assert_on_misuse: bool,
    cursor: usize,
    flush_pending: bool,
    sealed: bool,
    active: Option<ActiveLock>,
    backend: Backend,
    stats: RingStats,
}

impl RingAllocator {
    /// Backing memory is created lazily, on the first lock.
    pub fn new(spec: &BufferSpec, storage: Box<dyn BackingStorage>, fences: &FenceContext) -> Self {
        let capacity_bytes = spec.capacity_bytes();
        let usage = UsageFlags::for_spec(spec);

        let backend = match spec.backend {
            BackendKind::Delegated => {
                Backend::Delegated(DelegatedRing::new(storage, usage, capacity_bytes))
            }
            BackendKind::SelfManaged => Backend::Managed(ManagedRing::new(
                storage,
                usage,
                capacity_bytes,
                lcm(spec.ring.alignment.max(1), spec.element_size),
                &spec.ring,
                fences.clone(),
            )),
        };

        log::debug!("Creating ring allocator: {}", spec);

        Self {
            name: spec.name().to_owned(),
            element_size: spec.element_size,
            capacity_elements: spec.capacity_elements,
            capacity_bytes,
            usage: spec.usage,
            assert_on_misuse: spec.ring.assert_on_misuse,
            cursor: 0,
            flush_pending: false,
            sealed: false,
            active: None,
            backend,
            stats: RingStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn capacity_elements(&self) -> usize {
        self.capacity_elements
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn is_dynamic(&self) -> bool {
        self.usage == BufferUsage::Dynamic
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self.backend {
            Backend::Delegated(_) => BackendKind::Delegated,
            Backend::Managed(_) => BackendKind::SelfManaged,
        }
    }

    /// Byte offset of the next append.
    pub fn write_cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_locked(&self) -> bool {
        self.active.is_some()
    }

    pub fn flush_pending(&self) -> bool {
        self.flush_pending
    }

    pub fn is_allocated(&self) -> bool {
        match &self.backend {
            Backend::Delegated(ring) => ring.is_allocated(),
            Backend::Managed(ring) => ring.is_allocated(),
        }
    }

    pub fn stats(&self) -> RingStats {
        match &self.backend {
            Backend::Delegated(_) => self.stats,
            Backend::Managed(ring) => RingStats {
                ledger_coalesces: ring.ledger().coalesced(),
                ..self.stats
            },
        }
    }

    pub(crate) fn stats_mut(&mut self) -> &mut RingStats {
        &mut self.stats
    }

    pub(crate) fn assert_on_misuse(&self) -> bool {
        self.assert_on_misuse
    }

    /// Commit granularity: staged copies must round the same way.
    pub(crate) fn granularity(&self) -> usize {
        match &self.backend {
            Backend::Delegated(_) => self.element_size,
            Backend::Managed(ring) => ring.granularity(),
        }
    }

    /// In-flight regions, head first. Empty for the delegated backend.
    pub fn ledger_snapshot(&self) -> Vec<LedgerEntry> {
        match &self.backend {
            Backend::Delegated(_) => Vec::new(),
            Backend::Managed(ring) => ring.ledger().iter().copied().collect(),
        }
    }

    /// End of the range known to be free ahead of the cursor.
    pub fn next_blocking_position(&self) -> Option<usize> {
        match &self.backend {
            Backend::Delegated(_) => None,
            Backend::Managed(ring) => Some(ring.free_end()),
        }
    }

    pub fn room_remaining(&self) -> usize {
        if self.flush_pending {
            self.capacity_elements
        } else {
            (self.capacity_bytes - self.cursor) / self.element_size
        }
    }

    pub fn has_enough_room(&self, num_elements: usize) -> bool {
        num_elements <= self.room_remaining()
    }

    /// Forces the next write lock to discard. Ignored for static buffers.
    pub fn flush_at_next_lock(&mut self) {
        self.flush_pending = self.is_dynamic();
    }

    pub(crate) fn misuse(&self, error: LockError) -> LockError {
        misuse(self.assert_on_misuse, &self.name, error)
    }

    pub(crate) fn check_request(
        &self,
        num_elements: usize,
        mode: LockMode,
    ) -> Result<(), LockError> {
        if num_elements == 0 {
            return Err(self.misuse(LockError::ZeroElements));
        }
        if num_elements > self.capacity_elements {
            return Err(self.misuse(LockError::TooManyElements {
                requested: num_elements,
                capacity: self.capacity_elements,
            }));
        }
        if mode.is_write() && self.sealed {
            return Err(self.misuse(LockError::StaticBufferSealed));
        }
        Ok(())
    }

    pub fn lock(&mut self, num_elements: usize, mode: LockMode) -> Result<LockResult, LockError> {
        let _span = tracing::trace_span!("ring_lock", buffer = %self.name, elements = num_elements)
            .entered();
        #[cfg(feature = "tracing")]
        let _zone = tracy_client::span!("RingAllocator::lock");

        if self.active.is_some() {
            return Err(self.misuse(LockError::AlreadyLocked));
        }
        self.check_request(num_elements, mode)?;

        match self.try_lock(num_elements, mode) {
            Ok(result) => {
                self.stats.locks += 1;
                self.active = Some(ActiveLock {
                    byte_offset: result.byte_offset,
                    element_count: num_elements,
                    mode,
                });
                Ok(result)
            }
            Err(e) => {
                self.stats.failed_locks += 1;
                log::warn!("{}: lock of {} elements failed: {}", self.name, num_elements, e);
                Err(e)
            }
        }
    }

    fn try_lock(&mut self, num_elements: usize, mode: LockMode) -> Result<LockResult, LockError> {
        let size = num_elements * self.element_size;

        match &mut self.backend {
            Backend::Delegated(ring) => ring.ensure_allocated(&self.name)?,
            Backend::Managed(ring) => ring.ensure_allocated(&self.name)?,
        }

        if mode == LockMode::ReadOnly {
            if let Backend::Delegated(ring) = &mut self.backend {
                ring.map(0, size, MapPolicy::ReadOnly)?;
            }
            return Ok(LockResult {
                element_offset: 0,
                byte_offset: 0,
                element_count: num_elements,
                discarded: false,
                staged: false,
            });
        }

        let discard = needs_discard(
            self.cursor,
            size,
            self.capacity_bytes,
            mode,
            self.flush_pending,
        );
        if discard {
            self.flush_pending = false;
            self.stats.discards += 1;
        } else {
            self.stats.appends += 1;
        }

        match &mut self.backend {
            Backend::Delegated(ring) => {
                if discard {
                    self.cursor = 0;
                }
                let policy = match (self.usage, self.cursor) {
                    (BufferUsage::Static, _) => MapPolicy::Overwrite,
                    (BufferUsage::Dynamic, 0) => MapPolicy::Discard,
                    (BufferUsage::Dynamic, _) => MapPolicy::NoOverwrite,
                };
                ring.map(self.cursor, size, policy)?;
            }
            Backend::Managed(ring) => {
                ring.block_until_unused(
                    &mut self.cursor,
                    size,
                    discard,
                    &mut self.stats,
                    &self.name,
                );
            }
        }

        #[cfg(feature = "tracing")]
        tracy_client::plot!("ring cursor", self.cursor as f64);

        Ok(LockResult {
            element_offset: self.cursor / self.element_size,
            byte_offset: self.cursor,
            element_count: num_elements,
            discarded: discard,
            staged: false,
        })
    }

    fn locked_range(&self) -> Option<Range<usize>> {
        let active = self.active?;
        let start = active.byte_offset;
        Some(start..start + active.element_count * self.element_size)
    }

    /// The locked region, or `None` when nothing is locked.
    pub fn locked_bytes_mut(&mut self) -> Option<&mut [u8]> {
        let range = self.locked_range()?;
        if self.active.is_some_and(|a| a.mode == LockMode::ReadOnly) {
            return None;
        }
        match &mut self.backend {
            Backend::Delegated(ring) => ring.bytes_mut(),
            Backend::Managed(ring) => ring.bytes_mut(range),
        }
    }

    pub fn locked_bytes(&self) -> Option<&[u8]> {
        let range = self.locked_range()?;
        match &self.backend {
            Backend::Delegated(ring) => ring.bytes(),
            Backend::Managed(ring) => ring.bytes(range),
        }
    }

    /// Commits `num_written` elements of the open lock. A no-op when nothing
    /// is locked.
    pub fn unlock(&mut self, num_written: usize) {
        let _span = tracing::trace_span!("ring_unlock", buffer = %self.name, elements = num_written)
            .entered();

        let Some(active) = self.active.take() else {
            log::trace!("{}: unlock without an open lock", self.name);
            return;
        };

        let written = if num_written > active.element_count {
            self.misuse(LockError::UnlockOverrun {
                written: num_written,
                locked: active.element_count,
            });
            active.element_count
        } else {
            num_written
        };
        let bytes = written * self.element_size;

        match &mut self.backend {
            Backend::Delegated(ring) => {
                ring.unmap();
                if active.mode.is_write() {
                    self.cursor = active.byte_offset + bytes;
                }
            }
            Backend::Managed(ring) => {
                if active.mode.is_write() {
                    self.cursor = ring.commit(active.byte_offset, bytes);
                }
            }
        }
    }

    /// Stamps the newest committed region with the fence of the work being
    /// recorded. Must be called once the consumer has been told to read it.
    pub fn mark_used_in_rendering(&mut self) {
        if self.usage == BufferUsage::Static && !self.sealed && self.cursor > 0 {
            log::trace!("{}: sealed", self.name);
            self.sealed = true;
        }
        if let Backend::Managed(ring) = &mut self.backend {
            ring.mark_used(&self.name);
        }
    }
}
