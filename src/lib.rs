pub mod binding;
pub mod buffer;
pub mod error;
pub mod fence;
pub mod stats;

pub use binding::DeviceBindingCache;
pub use buffer::{BufferKey, BufferManager, BufferSpec, LockMode, LockResult, RingAllocator};
pub use error::{LockError, Severity};
pub use fence::{FenceContext, FenceValue};
pub use stats::RingStats;
