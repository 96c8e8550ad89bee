// Mock implementations for dependency injection testing.
//
// ManualMemoryManager never reclaims anything on its own; tests decide which
// handles are enqueued and when.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::interfaces::memory::{MemoryManager, Reclaimable};
use crate::types::HandleId;

/// Memory manager whose reclamation is driven entirely by the test.
#[derive(Default)]
pub struct ManualMemoryManager {
    tracked: Mutex<Vec<Weak<dyn Reclaimable>>>,
    pub track_calls: AtomicUsize,
}

impl ManualMemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_call_count(&self) -> usize {
        self.track_calls.load(Ordering::Acquire)
    }

    /// Handles still alive, in tracking order.
    pub fn live_handles(&self) -> Vec<Arc<dyn Reclaimable>> {
        self.tracked
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Enqueue one handle regardless of reachability.
    pub fn enqueue(&self, id: HandleId) -> bool {
        self.live_handles()
            .into_iter()
            .find(|handle| handle.id() == id)
            .is_some_and(|handle| handle.enqueue())
    }

    /// Enqueue every live handle regardless of reachability.
    pub fn enqueue_all(&self) -> usize {
        self.live_handles()
            .into_iter()
            .filter(|handle| Arc::clone(handle).enqueue())
            .count()
    }
}

impl MemoryManager for ManualMemoryManager {
    fn track(&self, handle: Arc<dyn Reclaimable>) {
        self.track_calls.fetch_add(1, Ordering::Release);
        self.tracked.lock().push(Arc::downgrade(&handle));
    }
}
