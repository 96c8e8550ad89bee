//! Finalizable reference registries and the heap that reclaims them
//!
//! This module pairs registries of tracked references with a memory manager
//! that decides when the referenced values are gone.
//!
//! ## Features
//!
//! - **Handles**: weak, soft and phantom tracked references bound to a queue
//! - **Reclamation Worker**: one background consumer per registry, firing
//!   each callback at most once
//! - **Finalizable Set**: unordered, thread-safe, deduplicated on read
//! - **Finalizable List**: ordered, index-addressable, single writer
//! - **Managed Heap**: reference-count driven reclamation with simulated capacity

// Submodules
pub mod handle;
pub mod heap;
pub mod list;
pub mod set;
pub mod worker;


// Re-export public APIs
pub use handle::Handle;
pub use heap::{HeapStats, ManagedHeap, Reservation};
pub use list::FinalizableList;
pub use set::{FinalizableSet, SetCursor};
pub use worker::{Callback, ReclamationWorker, WorkerStats};
