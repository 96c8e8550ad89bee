//! Finalizable reference set
//!
//! An unordered bag of tracked handles, each with its own one-shot callback.
//! Reads are deduplicated by value identity; registrations are not.
//!
//! Every operation that touches the callback map, including snapshot reads,
//! runs under one registry-wide lock shared with the reclamation worker.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;

use super::handle::Handle;
use super::worker::{Callback, CallbackStore, ReclamationWorker, WorkerStats};
use crate::error::{RegistryError, RegistryResult};
use crate::interfaces::MemoryManager;
use crate::types::{RegistryConfig, Tier, TypeDescriptor};

/// Rendered in place of values that cannot be observed.
pub(crate) const UNOBSERVABLE: &str = "<unobservable>";

struct SetState<T> {
    callbacks: HashMap<Handle<T>, Callback>,
    descriptor: Option<TypeDescriptor>,
}

struct SetCore<T> {
    state: Mutex<SetState<T>>,
}

impl<T: Send + Sync + 'static> CallbackStore<T> for SetCore<T> {
    fn take_callback(&self, handle: &Handle<T>) -> Option<Callback> {
        self.state.lock().callbacks.remove(handle)
    }
}

impl<T> SetCore<T> {
    /// Remove every registration whose handle yields `value`.
    ///
    /// The removed entries are returned so they can be dropped after the
    /// lock is released.
    fn detach_value(state: &mut SetState<T>, value: &Arc<T>) -> Vec<(Handle<T>, Callback)> {
        let doomed: Vec<Handle<T>> = state
            .callbacks
            .keys()
            .filter(|handle| handle.refers_to(value))
            .cloned()
            .collect();

        doomed
            .into_iter()
            .filter_map(|handle| state.callbacks.remove_entry(&handle))
            .collect()
    }

    /// Upgrade a handle snapshot taken under the lock, keeping each value
    /// once. Runs unlocked, since a failed upgrade may drop the value.
    fn snapshot_values(handles: Vec<Handle<T>>) -> Vec<Arc<T>> {
        let mut seen = HashSet::new();
        handles
            .iter()
            .filter_map(Handle::get)
            .filter(|value| seen.insert(Arc::as_ptr(value)))
            .collect()
    }
}

/// Set of values with per-registration reclamation callbacks.
///
/// Each [`add`](Self::add) creates an independent handle, so one value may
/// carry several callbacks. Reads ([`to_vec`](Self::to_vec),
/// [`iter`](Self::iter)) see each live value once. Phantom sets never expose
/// values, so their reads are always empty.
///
/// # Examples
///
/// ```
/// use finref::{FinalizableSet, ManagedHeap};
/// use std::sync::Arc;
///
/// let heap = Arc::new(ManagedHeap::default());
/// let set = FinalizableSet::weak(heap.clone()).unwrap();
/// let value = Arc::new(10);
///
/// assert!(set.add(&value, || {}));
/// assert!(!set.add(&value, || {}));
/// assert_eq!(set.len(), 2);
/// assert_eq!(set.to_vec().len(), 1);
///
/// assert!(set.remove(&value));
/// assert!(set.is_empty());
/// ```
pub struct FinalizableSet<T: Send + Sync + 'static> {
    tier: Tier,
    core: Arc<SetCore<T>>,
    queue: Sender<Handle<T>>,
    manager: Arc<dyn MemoryManager>,
    worker: ReclamationWorker,
    active: AtomicBool,
}

impl<T: Send + Sync + 'static> FinalizableSet<T> {
    pub fn weak(manager: Arc<dyn MemoryManager>) -> RegistryResult<Self> {
        Self::new(Tier::Weak, manager)
    }

    pub fn soft(manager: Arc<dyn MemoryManager>) -> RegistryResult<Self> {
        Self::new(Tier::Soft, manager)
    }

    pub fn phantom(manager: Arc<dyn MemoryManager>) -> RegistryResult<Self> {
        Self::new(Tier::Phantom, manager)
    }

    pub fn new(tier: Tier, manager: Arc<dyn MemoryManager>) -> RegistryResult<Self> {
        Self::with_config(tier, manager, RegistryConfig::default())
    }

    /// Create a set and start its reclamation worker.
    pub fn with_config(
        tier: Tier,
        manager: Arc<dyn MemoryManager>,
        config: RegistryConfig,
    ) -> RegistryResult<Self> {
        let (queue, reclaimed) = channel::unbounded();
        let core = Arc::new(SetCore {
            state: Mutex::new(SetState {
                callbacks: HashMap::new(),
                descriptor: None,
            }),
        });
        let worker = ReclamationWorker::spawn(&config.worker_name, reclaimed, Arc::clone(&core))?;

        Ok(Self {
            tier,
            core,
            queue,
            manager,
            worker,
            active: AtomicBool::new(true),
        })
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Register `callback` to fire once `value` is reclaimed.
    ///
    /// Returns true if no other live handle in the set yielded `value`
    /// beforehand. Always true for phantom sets.
    ///
    /// The callback must not own a strong reference to `value`, or the value
    /// never becomes unreachable.
    pub fn add<F>(&self, value: &Arc<T>, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = Handle::bind(self.tier, value, &self.queue);

        let was_present = {
            let mut state = self.core.state.lock();
            let was_present = state.callbacks.keys().any(|existing| existing.refers_to(value));
            state
                .descriptor
                .get_or_insert_with(|| TypeDescriptor::of::<T>(self.tier));
            state.callbacks.insert(handle.clone(), Box::new(callback));
            was_present
        };

        self.manager.track(handle.as_reclaimable());
        !was_present
    }

    /// Remove every registration for `value` without invoking callbacks.
    ///
    /// Returns true if at least one registration was removed. Always false
    /// for phantom sets.
    pub fn remove(&self, value: &Arc<T>) -> bool {
        let removed = {
            let mut state = self.core.state.lock();
            SetCore::detach_value(&mut state, value)
        };
        !removed.is_empty()
    }

    /// Drop every registration without invoking callbacks.
    pub fn clear(&self) {
        let removed = std::mem::take(&mut self.core.state.lock().callbacks);
        drop(removed);
    }

    /// Number of live registrations, counting duplicates of the same value.
    pub fn len(&self) -> usize {
        self.core.state.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct live values from a single snapshot of the handles.
    pub fn to_vec(&self) -> Vec<Arc<T>> {
        SetCore::snapshot_values(self.handles())
    }

    /// Snapshot of every live handle.
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.core.state.lock().callbacks.keys().cloned().collect()
    }

    /// Cursor over a deduplicated snapshot of the set's values.
    pub fn iter(&self) -> SetCursor<'_, T> {
        SetCursor {
            set: self,
            snapshot: self.to_vec(),
            position: 0,
            can_remove: false,
        }
    }

    /// Tier and type captured from the first registration.
    pub fn descriptor(&self) -> Option<TypeDescriptor> {
        self.core.state.lock().descriptor
    }

    /// Stop the reclamation worker and mark the set inactive.
    ///
    /// Idempotent. Every call returns only once the worker has exited, even
    /// when another thread is already tearing it down. Registrations made or
    /// reclaimed afterwards never fire; pending notifications are not drained.
    pub fn destroy(&self) {
        let was_active = self.active.swap(false, Ordering::AcqRel);
        self.worker.stop();
        if was_active {
            log::debug!("destroyed {} set with {} registrations", self.tier, self.len());
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn get_stats(&self) -> WorkerStats {
        self.worker.get_stats()
    }
}

impl<T: Send + Sync + 'static> Drop for FinalizableSet<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<T: Send + Sync + fmt::Display + 'static> fmt::Display for FinalizableSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (descriptor, handles) = {
            let state = self.core.state.lock();
            let handles: Vec<Handle<T>> = state.callbacks.keys().cloned().collect();
            (state.descriptor, handles)
        };
        if let Some(descriptor) = descriptor {
            writeln!(f, "{descriptor}")?;
        }
        if handles.is_empty() {
            return f.write_str("set is empty");
        }

        for (index, handle) in handles.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            match handle.get() {
                Some(value) => write!(f, "{value}")?,
                None => f.write_str(UNOBSERVABLE)?,
            }
        }
        Ok(())
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for FinalizableSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizableSet")
            .field("tier", &self.tier)
            .field("len", &self.len())
            .field("active", &self.is_active())
            .finish()
    }
}

impl<'a, T: Send + Sync + 'static> IntoIterator for &'a FinalizableSet<T> {
    type Item = Arc<T>;
    type IntoIter = SetCursor<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Stateful cursor over a snapshot of a [`FinalizableSet`].
///
/// [`remove`](Self::remove) drops every registration of the value most
/// recently returned by [`try_next`](Self::try_next).
pub struct SetCursor<'a, T: Send + Sync + 'static> {
    set: &'a FinalizableSet<T>,
    snapshot: Vec<Arc<T>>,
    position: usize,
    can_remove: bool,
}

impl<T: Send + Sync + 'static> SetCursor<'_, T> {
    pub fn has_next(&self) -> bool {
        self.position < self.snapshot.len()
    }

    /// Advance to the next value, failing with `NoSuchElement` at the end.
    pub fn try_next(&mut self) -> RegistryResult<Arc<T>> {
        let value = self
            .snapshot
            .get(self.position)
            .cloned()
            .ok_or_else(RegistryError::exhausted)?;
        self.position += 1;
        self.can_remove = true;
        Ok(value)
    }

    /// Remove all registrations of the value last returned.
    ///
    /// Fails with `IllegalIteratorState` before the first advance or when
    /// called twice without an advance in between. Returns the number of
    /// registrations removed.
    pub fn remove(&mut self) -> RegistryResult<usize> {
        if !self.can_remove {
            return Err(RegistryError::IllegalIteratorState);
        }
        self.can_remove = false;

        let value = &self.snapshot[self.position - 1];
        let removed = {
            let mut state = self.set.core.state.lock();
            SetCore::detach_value(&mut state, value)
        };
        Ok(removed.len())
    }

    /// Values not yet returned
    pub fn remaining(&self) -> usize {
        self.snapshot.len() - self.position
    }
}

impl<T: Send + Sync + 'static> Iterator for SetCursor<'_, T> {
    type Item = Arc<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_next().ok()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}
