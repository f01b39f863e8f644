mod sub_pass;
mod timeline;

use std::fmt;
use std::sync::Arc;

pub use sub_pass::{EpochTag, NoSubPasses, SubPassState, SubPassTracker};
pub use timeline::{FenceTimeline, Timeline};

/// Monotonically increasing value published by the consumer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(pub u64);

impl fmt::Display for FenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fence#{}", self.0)
    }
}

/// The consumer-side collaborators a self-managed ring needs.
#[derive(Clone)]
pub struct FenceContext {
    pub timeline: Arc<dyn FenceTimeline>,
    pub sub_pass: Arc<dyn SubPassTracker>,
}

impl FenceContext {
    pub fn new(timeline: Arc<dyn FenceTimeline>, sub_pass: Arc<dyn SubPassTracker>) -> Self {
        Self { timeline, sub_pass }
    }

    pub fn without_sub_passes(timeline: Arc<dyn FenceTimeline>) -> Self {
        Self {
            timeline,
            sub_pass: Arc::new(NoSubPasses),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing;
