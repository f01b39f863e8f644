use std::sync::Arc;

use geostream::buffer::MemoryBudget;
use geostream::fence::{SubPassState, Timeline};

pub struct ProducerCaps {
    pub timeline: Arc<Timeline>,
    pub sub_pass: Arc<SubPassState>,
    pub budget: Arc<MemoryBudget>,
}

pub struct ConsumerCaps {
    // The consumer only ever signals, so sharing the timeline is fine.
    pub timeline: Arc<Timeline>,
}
