//! Finalizable reference registries.
//!
//! Attach a one-shot callback to a value's lifecycle and have it fire once the
//! value is only reachable through a weak, soft or phantom relationship. A
//! pluggable [`MemoryManager`] decides reachability; [`ManagedHeap`] is the
//! reference-counted implementation shipped with the crate.

pub mod error;
pub mod interfaces;
pub mod memory_management;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use interfaces::{MemoryManager, Reclaimable};
pub use memory_management::{
    Callback, FinalizableList, FinalizableSet, Handle, HeapStats, ManagedHeap, ReclamationWorker,
    Reservation, SetCursor, WorkerStats,
};
pub use types::{HandleId, HeapConfig, RegistryConfig, Tier, TypeDescriptor};
