use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque token naming one open, must-not-be-interrupted rendering phase.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EpochTag(pub u64);

pub trait SubPassTracker: Send + Sync {
    fn is_in_open_sub_pass(&self) -> bool;
    fn current_sub_pass_epoch(&self) -> Option<EpochTag>;
    fn end_current_sub_pass_early(&self);
}

/// For renderers that never open sub-passes.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoSubPasses;

impl SubPassTracker for NoSubPasses {
    fn is_in_open_sub_pass(&self) -> bool {
        false
    }

    fn current_sub_pass_epoch(&self) -> Option<EpochTag> {
        None
    }

    fn end_current_sub_pass_early(&self) {}
}

type EarlyEndHook = Box<dyn FnMut(EpochTag) + Send>;

#[derive(Default)]
pub struct SubPassState {
    open: Mutex<Option<EpochTag>>,
    next_epoch: AtomicU64,
    early_ends: AtomicU64,
    on_early_end: Mutex<Option<EarlyEndHook>>,
}

impl SubPassState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook run when a ring ends the open sub-pass to avoid stalling on it,
    /// typically submitting the work recorded so far.
    pub fn with_early_end_hook(self, hook: impl FnMut(EpochTag) + Send + 'static) -> Self {
        *self
            .on_early_end
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Box::new(hook));
        self
    }

    pub fn begin(&self) -> EpochTag {
        let epoch = EpochTag(self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1);
        let mut open = self
            .open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = open.replace(epoch) {
            log::warn!("SubPass: {:?} begun while {:?} was open", epoch, previous);
        }
        epoch
    }

    pub fn end(&self) {
        self.open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    pub fn early_ends(&self) -> u64 {
        self.early_ends.load(Ordering::Relaxed)
    }
}

impl SubPassTracker for SubPassState {
    fn is_in_open_sub_pass(&self) -> bool {
        self.open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    fn current_sub_pass_epoch(&self) -> Option<EpochTag> {
        *self
            .open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn end_current_sub_pass_early(&self) {
        let Some(epoch) = self
            .open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        else {
            return;
        };

        log::debug!("SubPass: ending {:?} early", epoch);
        self.early_ends.fetch_add(1, Ordering::Relaxed);

        if let Some(hook) = self
            .on_early_end
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_mut()
        {
            hook(epoch);
        }
    }
}
