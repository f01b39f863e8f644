use std::sync::{Condvar, Mutex, MutexGuard};

use super::FenceValue;

/// Read-only view of the consumer's progress.
///
/// The allocator never produces fence values; it only stamps regions with
/// `current_fence` and later waits for them.
pub trait FenceTimeline: Send + Sync {
    /// Fence that will be signalled once the work currently being recorded
    /// has been consumed.
    fn current_fence(&self) -> FenceValue;

    fn is_fence_satisfied(&self, fence: FenceValue) -> bool;

    /// Blocks until `fence` is satisfied. No timeout.
    fn block_on_fence(&self, fence: FenceValue);
}

struct TimelineState {
    recording: u64,
    completed: u64,
}

/// Condvar-backed timeline: the producer submits, the consumer signals.
pub struct Timeline {
    state: Mutex<TimelineState>,
    signalled: Condvar,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TimelineState {
                recording: 1,
                completed: 0,
            }),
            signalled: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimelineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Closes the work being recorded and returns the fence it will signal.
    pub fn submit(&self) -> FenceValue {
        let mut state = self.lock();
        let fence = state.recording;
        state.recording += 1;
        log::trace!("Timeline: submitted fence#{}", fence);
        FenceValue(fence)
    }

    /// Called by the consumer once everything up to `fence` has been read.
    pub fn signal(&self, fence: FenceValue) {
        let mut state = self.lock();
        if fence.0 > state.completed {
            state.completed = fence.0;
            self.signalled.notify_all();
        }
    }

    pub fn completed(&self) -> FenceValue {
        FenceValue(self.lock().completed)
    }

    pub fn last_submitted(&self) -> FenceValue {
        FenceValue(self.lock().recording - 1)
    }
}

impl FenceTimeline for Timeline {
    fn current_fence(&self) -> FenceValue {
        FenceValue(self.lock().recording)
    }

    fn is_fence_satisfied(&self, fence: FenceValue) -> bool {
        self.lock().completed >= fence.0
    }

    fn block_on_fence(&self, fence: FenceValue) {
        let mut state = self.lock();
        if fence.0 >= state.recording {
            log::warn!(
                "Timeline: waiting on {} which has not been submitted yet",
                fence
            );
        }
        while state.completed < fence.0 {
            state = self
                .signalled
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn submit_advances_current_fence() {
        let timeline = Timeline::new();
        assert_eq!(timeline.current_fence(), FenceValue(1));
        assert_eq!(timeline.submit(), FenceValue(1));
        assert_eq!(timeline.current_fence(), FenceValue(2));
        assert_eq!(timeline.last_submitted(), FenceValue(1));
        assert!(!timeline.is_fence_satisfied(FenceValue(1)));
    }

    #[test]
    fn signal_is_monotonic() {
        let timeline = Timeline::new();
        timeline.signal(FenceValue(3));
        timeline.signal(FenceValue(2));
        assert_eq!(timeline.completed(), FenceValue(3));
        assert!(timeline.is_fence_satisfied(FenceValue(3)));
        assert!(!timeline.is_fence_satisfied(FenceValue(4)));
    }

    #[test]
    fn block_returns_once_consumer_signals() {
        let timeline = Arc::new(Timeline::new());
        let fence = timeline.submit();

        let consumer = {
            let timeline = timeline.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                timeline.signal(fence);
            })
        };

        timeline.block_on_fence(fence);
        assert!(timeline.is_fence_satisfied(fence));
        consumer.join().unwrap();
    }
}
