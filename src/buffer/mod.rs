mod keys;
mod ledger;
mod manager;
mod region;
mod ring;
mod spec;
mod staging;
mod storage;

pub use keys::*;
pub use ledger::{Ledger, LedgerEntry};
pub use manager::BufferManager;
pub use region::BufferRegion;
pub use ring::{LockMode, LockResult, RingAllocator};
pub use spec::{
    BackendKind, BufferKind, BufferSpec, BufferUsage, MIN_LEDGER_CAPACITY, RingConfig,
    SubPassPolicy,
};
pub use staging::{StagingBuffer, StagingPlan};
pub use storage::{
    BackingStorage, HostStorage, HostStorageProvider, MapCounters, MapPolicy, MemoryBudget,
    StorageError, StorageProvider, UsageFlags,
};
