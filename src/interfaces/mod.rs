// Interface modules for dependency injection and testability.
//
// This module provides the memory manager capability the registries depend
// on, along with a manual implementation and helpers for unit tests.

pub mod memory;

#[cfg(test)]
pub mod mocks;

#[cfg(test)]
pub mod test_utils;

pub use memory::{MemoryManager, Reclaimable};

#[cfg(test)]
pub use mocks::ManualMemoryManager;
