use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use geostream::{BufferKey, FenceValue};

#[derive(Debug)]
pub struct LoadRequest {
    pub asset_id: u32,
    pub vertex_count: usize,
}

#[derive(Debug)]
pub struct LoadComplete {
    pub asset_id: u32,
}

/// Geometry the loader wrote off-thread, waiting to be drawn.
#[derive(Debug)]
pub struct StagedBatch {
    pub asset_id: u32,
    pub key: BufferKey,
    pub element_offset: usize,
    pub element_count: usize,
}

/// Work handed to the consumer, which signals `fence` once it has read it.
#[derive(Debug)]
pub struct Submission {
    pub fence: FenceValue,
    pub submitted_at: Instant,
    pub early: bool,
}

/// Threads stop in this order; each one exits once its phase is reached.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    Running,
    StopGameplay,
    StopLoader,
    StopProducer,
    StopConsumer,
}

const PHASES: [ShutdownPhase; 5] = [
    ShutdownPhase::Running,
    ShutdownPhase::StopGameplay,
    ShutdownPhase::StopLoader,
    ShutdownPhase::StopProducer,
    ShutdownPhase::StopConsumer,
];

#[derive(Default)]
pub struct EngineControl {
    phase: AtomicU8,
}

impl EngineControl {
    /// Phases only move forward.
    pub fn advance(&self, phase: ShutdownPhase) {
        self.phase.fetch_max(phase as u8, Ordering::AcqRel);
    }

    pub fn phase(&self) -> ShutdownPhase {
        let raw = self.phase.load(Ordering::Acquire) as usize;
        PHASES[raw.min(PHASES.len() - 1)]
    }

    pub fn reached(&self, phase: ShutdownPhase) -> bool {
        self.phase() >= phase
    }
}
