//! Ordered record of regions the consumer may still be reading.
//!
//! Entries live in a fixed-capacity circular array so that pushing and
//! reclaiming never allocate on the lock path.

use crate::fence::{EpochTag, FenceValue};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub start: usize,
    pub end: usize,
    /// Latest fence the consumer may read this range under. `None` until
    /// the range is first marked as used in rendering.
    pub fence: Option<FenceValue>,
    pub epoch: Option<EpochTag>,
    /// Committed since the last mark; the next mark stamps it.
    pub pending: bool,
}

impl LedgerEntry {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            fence: None,
            epoch: None,
            pending: true,
        }
    }

    /// Raises the fence to at least `fence`.
    pub fn stamp(&mut self, fence: FenceValue, epoch: Option<EpochTag>) {
        if self.fence.is_none_or(|existing| fence >= existing) {
            self.fence = Some(fence);
            if epoch.is_some() {
                self.epoch = epoch;
            }
        }
        self.pending = false;
    }

    /// Takes over the fence of a range that this entry now covers.
    pub fn absorb(&mut self, other: &LedgerEntry) {
        if other.fence > self.fence {
            self.fence = other.fence;
            self.epoch = other.epoch;
        }
        self.pending |= other.pending;
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

pub struct Ledger {
    slots: Box<[LedgerEntry]>,
    head: usize,
    len: usize,
    coalesced: u64,
}

impl Ledger {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity >= 2, "ledger needs room for at least two entries");
        Self {
            slots: vec![LedgerEntry::new(0, 0); capacity].into_boxed_slice(),
            head: 0,
            len: 0,
            coalesced: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    #[inline]
    fn slot(&self, index: usize) -> usize {
        (self.head + index) % self.slots.len()
    }

    pub fn get(&self, index: usize) -> Option<&LedgerEntry> {
        (index < self.len).then(|| &self.slots[self.slot(index)])
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut LedgerEntry> {
        if index < self.len {
            let slot = self.slot(index);
            Some(&mut self.slots[slot])
        } else {
            None
        }
    }

    pub fn front(&self) -> Option<&LedgerEntry> {
        self.get(0)
    }

    pub fn back(&self) -> Option<&LedgerEntry> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    pub fn back_mut(&mut self) -> Option<&mut LedgerEntry> {
        self.len.checked_sub(1).and_then(|i| self.get_mut(i))
    }

    pub fn pop_front(&mut self) -> Option<LedgerEntry> {
        if self.len == 0 {
            return None;
        }
        let entry = self.slots[self.head];
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        Some(entry)
    }

    /// Appends at the tail. A full ledger first merges its newest contiguous
    /// pair of entries, so a push always succeeds.
    pub fn push(&mut self, entry: LedgerEntry) {
        if self.len == self.slots.len() {
            self.coalesce_newest_pair();
        }
        let slot = self.slot(self.len);
        self.slots[slot] = entry;
        self.len += 1;
    }

    fn coalesce_newest_pair(&mut self) {
        for later in (1..self.len).rev() {
            let earlier = later - 1;
            let (a, b) = (self.slots[self.slot(earlier)], self.slots[self.slot(later)]);
            if a.end != b.start {
                continue;
            }

            // The merged range is busy until both halves are released.
            let mut merged = LedgerEntry {
                start: a.start,
                end: b.end,
                ..b
            };
            merged.absorb(&a);

            let earlier_slot = self.slot(earlier);
            self.slots[earlier_slot] = merged;
            for index in later..self.len - 1 {
                let (to, from) = (self.slot(index), self.slot(index + 1));
                self.slots[to] = self.slots[from];
            }
            self.len -= 1;
            self.coalesced += 1;
            log::trace!("Ledger: coalesced [{}, {})", merged.start, merged.end);
            return;
        }

        // Entries from at most two laps are live, and each lap is contiguous,
        // so a pair always exists once the capacity is at least four.
        log::error!("Ledger: full with no contiguous entries; dropping the oldest");
        self.pop_front();
    }

    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntry> + '_ {
        (0..self.len).map(move |i| &self.slots[self.slot(i)])
    }

    /// Stamps the newest entry and every pending entry before it. Returns
    /// how many entries were stamped.
    pub fn stamp_pending(&mut self, fence: FenceValue, epoch: Option<EpochTag>) -> usize {
        let mut stamped = 0;
        for index in (0..self.len).rev() {
            let Some(entry) = self.get_mut(index) else {
                break;
            };
            if stamped > 0 && !entry.pending {
                break;
            }
            entry.stamp(fence, epoch);
            stamped += 1;
        }
        stamped
    }
}
