//! CPU-side stand-in for a ring locked off the owning thread.

use std::ops::Range;

use crate::buffer::ring::{LockMode, LockResult, align_up, needs_discard};
use crate::buffer::StorageError;

/// How staged bytes have to be replayed into the real ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPlan {
    pub mode: LockMode,
    /// Byte offset the ring must hand back for the replay.
    pub expected_offset: usize,
    pub element_count: usize,
    pub bytes: Range<usize>,
}

#[derive(Debug, Copy, Clone)]
struct StagedLock {
    byte_offset: usize,
    element_count: usize,
}

/// Mirrors the ring byte for byte, so offsets handed out while staging are
/// the offsets the data lands at after late creation.
pub struct StagingBuffer {
    bytes: Box<[u8]>,
    element_size: usize,
    granularity: usize,
    start_offset: usize,
    cursor: usize,
    discarded: bool,
    pending_flush: bool,
    active: Option<StagedLock>,
}

impl StagingBuffer {
    /// `start_offset` is the ring's write cursor when staging begins.
    pub fn new(
        capacity_bytes: usize,
        element_size: usize,
        granularity: usize,
        start_offset: usize,
        pending_flush: bool,
    ) -> Result<Self, StorageError> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(capacity_bytes)
            .map_err(|_| StorageError::StagingAllocation {
                bytes: capacity_bytes,
            })?;
        bytes.resize(capacity_bytes, 0);

        Ok(Self {
            bytes: bytes.into_boxed_slice(),
            element_size,
            granularity,
            start_offset,
            cursor: start_offset,
            discarded: false,
            pending_flush,
            active: None,
        })
    }

    pub fn capacity_bytes(&self) -> usize {
        self.bytes.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_locked(&self) -> bool {
        self.active.is_some()
    }

    pub fn has_pending_flush(&self) -> bool {
        self.pending_flush
    }

    pub fn request_flush(&mut self) {
        self.pending_flush = true;
    }

    pub fn room_remaining(&self) -> usize {
        if self.pending_flush {
            self.bytes.len() / self.element_size
        } else {
            (self.bytes.len() - self.cursor) / self.element_size
        }
    }

    /// Caller has already validated the request against the ring.
    pub fn lock(&mut self, num_elements: usize, mode: LockMode) -> LockResult {
        let size = num_elements * self.element_size;
        let discard = needs_discard(
            self.cursor,
            size,
            self.bytes.len(),
            mode,
            self.pending_flush,
        );
        if discard {
            self.cursor = 0;
            self.discarded = true;
            self.pending_flush = false;
        }

        self.active = Some(StagedLock {
            byte_offset: self.cursor,
            element_count: num_elements,
        });

        LockResult {
            element_offset: self.cursor / self.element_size,
            byte_offset: self.cursor,
            element_count: num_elements,
            discarded: discard,
            staged: true,
        }
    }

    pub fn locked_bytes_mut(&mut self) -> Option<&mut [u8]> {
        let active = self.active?;
        let start = active.byte_offset;
        self.bytes
            .get_mut(start..start + active.element_count * self.element_size)
    }

    pub fn locked_bytes(&self) -> Option<&[u8]> {
        let active = self.active?;
        let start = active.byte_offset;
        self.bytes
            .get(start..start + active.element_count * self.element_size)
    }

    /// Returns the number of elements actually committed.
    pub fn unlock(&mut self, num_written: usize) -> usize {
        let Some(active) = self.active.take() else {
            return 0;
        };
        let written = num_written.min(active.element_count);
        let bytes = written * self.element_size;
        if bytes > 0 {
            self.cursor =
                align_up(active.byte_offset + bytes, self.granularity).min(self.bytes.len());
        }
        written
    }

    /// `None` when nothing was staged.
    pub fn plan(&self) -> Option<StagingPlan> {
        let (mode, expected_offset) = if self.discarded {
            (LockMode::Discard, 0)
        } else {
            (LockMode::Append, self.start_offset)
        };
        let bytes = expected_offset..self.cursor;
        let element_count = bytes.len().div_ceil(self.element_size);
        (element_count > 0).then_some(StagingPlan {
            mode,
            expected_offset,
            element_count,
            bytes,
        })
    }

    pub fn bytes(&self, range: Range<usize>) -> &[u8] {
        &self.bytes[range]
    }
}
