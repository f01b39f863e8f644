use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{FenceTimeline, FenceValue};

/// Timeline whose consumer catches up the moment anyone blocks on it.
#[derive(Default)]
pub(crate) struct ScriptedTimeline {
    current: AtomicU64,
    completed: AtomicU64,
    waits: Mutex<Vec<FenceValue>>,
}

impl ScriptedTimeline {
    pub(crate) fn new(current: u64) -> Self {
        Self {
            current: AtomicU64::new(current),
            ..Default::default()
        }
    }

    pub(crate) fn set_current(&self, fence: u64) {
        self.current.store(fence, Ordering::SeqCst);
    }

    pub(crate) fn complete(&self, fence: u64) {
        self.completed.fetch_max(fence, Ordering::SeqCst);
    }

    pub(crate) fn waits(&self) -> Vec<FenceValue> {
        self.waits.lock().unwrap().clone()
    }
}

impl FenceTimeline for ScriptedTimeline {
    fn current_fence(&self) -> FenceValue {
        FenceValue(self.current.load(Ordering::SeqCst))
    }

    fn is_fence_satisfied(&self, fence: FenceValue) -> bool {
        self.completed.load(Ordering::SeqCst) >= fence.0
    }

    fn block_on_fence(&self, fence: FenceValue) {
        self.waits.lock().unwrap().push(fence);
        self.complete(fence.0);
    }
}
