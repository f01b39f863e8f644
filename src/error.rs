use thiserror::Error;

use crate::buffer::StorageError;

/// How an error should be treated by the caller.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Severity {
    /// Programmer bug. Asserts when misuse assertions are on, otherwise the
    /// operation is refused and nothing changes.
    CallerMisuse,
    /// Out of device or staging memory. Skip the write for this frame.
    ResourceExhaustion,
    /// A half-written frame cannot be rendered.
    Fatal,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("buffer is already locked")]
    AlreadyLocked,

    #[error("no buffer with this key")]
    UnknownBuffer,

    #[error("cannot lock zero elements")]
    ZeroElements,

    #[error("requested {requested} elements but the buffer holds at most {capacity}")]
    TooManyElements { requested: usize, capacity: usize },

    #[error("unlock reported {written} elements written but only {locked} were locked")]
    UnlockOverrun { written: usize, locked: usize },

    #[error("{bytes} bytes is not a whole number of {element_size}-byte elements")]
    PartialElement { bytes: usize, element_size: usize },

    #[error("static buffer is already in use by the consumer and cannot be rewritten")]
    StaticBufferSealed,

    #[error("read-only locks must be taken on the thread that owns the rendering context")]
    ReadOnlyOffThread,

    #[error("backing memory unavailable: {0}")]
    OutOfMemory(#[from] StorageError),

    #[error("staged writes could not be copied into the buffer: {0}")]
    LateCreation(Box<LockError>),

    #[error("staged data expected at byte {expected} but the buffer placed it at {actual}")]
    StagingMismatch { expected: usize, actual: usize },
}

impl LockError {
    pub fn severity(&self) -> Severity {
        match self {
            LockError::AlreadyLocked
            | LockError::UnknownBuffer
            | LockError::ZeroElements
            | LockError::TooManyElements { .. }
            | LockError::UnlockOverrun { .. }
            | LockError::PartialElement { .. }
            | LockError::StaticBufferSealed
            | LockError::ReadOnlyOffThread => Severity::CallerMisuse,
            LockError::OutOfMemory(_) => Severity::ResourceExhaustion,
            LockError::LateCreation(_) | LockError::StagingMismatch { .. } => Severity::Fatal,
        }
    }
}

/// Reports a caller misuse, aborting when `assert_on_misuse` is set.
pub(crate) fn misuse(assert_on_misuse: bool, name: &str, error: LockError) -> LockError {
    log::error!("{}: {}", name, error);
    if assert_on_misuse {
        panic!("{}: {}", name, error);
    }
    error
}
