// Memory manager capability consumed by the registries.
//
// Registries never decide reachability themselves. They bind each handle to
// their reclamation queue and hand it to a MemoryManager, which later severs
// the handle and pushes it onto that queue exactly once.

use std::sync::Arc;

use crate::types::{HandleId, Tier};

/// Type-erased view of a tracked handle, as seen by a memory manager.
pub trait Reclaimable: Send + Sync {
    /// Identity of the handle
    fn id(&self) -> HandleId;

    /// Reclamation tier the handle was created with
    fn tier(&self) -> Tier;

    /// Whether anything other than the handle itself keeps the value alive.
    fn is_strongly_reachable(&self) -> bool;

    /// Sever the handle from its value if nothing outside the handle keeps
    /// the value alive.
    ///
    /// Returns true if the handle is cleared after the call. The check and the
    /// severing are atomic with respect to readers of the handle.
    fn clear_if_unreachable(&self) -> bool;

    /// Whether the handle no longer yields its value
    fn is_cleared(&self) -> bool;

    /// Whether the handle has already been pushed onto its queue
    fn is_enqueued(&self) -> bool;

    /// Push the handle onto its bound reclamation queue.
    ///
    /// Returns false if the handle was already enqueued or the queue has no
    /// receiver left. A handle is delivered at most once.
    fn enqueue(self: Arc<Self>) -> bool;
}

/// Capability that decides when tracked values become reclaimable.
///
/// Implementations must deliver each tracked handle to its queue at most once.
pub trait MemoryManager: Send + Sync {
    /// Begin tracking a freshly created handle.
    fn track(&self, handle: Arc<dyn Reclaimable>);
}
