//! Finalizable reference list
//!
//! Ordered, index-addressable handles with one callback each. Unlike
//! [`FinalizableSet`](super::FinalizableSet) it deduplicates nothing and has no
//! explicit teardown: the worker stops when the list is dropped.
//!
//! Individual calls are safe from any thread, but the list is meant for a
//! single writer. Compound sequences such as `get(i)` followed by `remove(i)`
//! are not atomic and may observe the worker removing reclaimed entries in
//! between.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;

use super::handle::Handle;
use super::set::UNOBSERVABLE;
use super::worker::{Callback, CallbackStore, ReclamationWorker, WorkerStats};
use crate::error::{RegistryError, RegistryResult};
use crate::interfaces::MemoryManager;
use crate::types::{RegistryConfig, Tier, TypeDescriptor};

struct ListState<T> {
    handles: Vec<Handle<T>>,
    callbacks: HashMap<Handle<T>, Callback>,
    descriptor: Option<TypeDescriptor>,
}

impl<T> ListState<T> {
    fn check_index(&self, index: usize) -> RegistryResult<()> {
        if index < self.handles.len() {
            Ok(())
        } else {
            Err(RegistryError::index_out_of_range(index, self.handles.len()))
        }
    }
}

struct ListCore<T> {
    state: Mutex<ListState<T>>,
}

impl<T: Send + Sync + 'static> CallbackStore<T> for ListCore<T> {
    fn take_callback(&self, handle: &Handle<T>) -> Option<Callback> {
        let mut state = self.state.lock();
        let callback = state.callbacks.remove(handle)?;
        if let Some(position) = state.handles.iter().position(|h| h == handle) {
            state.handles.remove(position);
        }
        Some(callback)
    }
}

/// Ordered list of tracked handles with reclamation callbacks.
///
/// # Examples
///
/// ```
/// use finref::{FinalizableList, ManagedHeap};
/// use std::sync::Arc;
///
/// let heap = Arc::new(ManagedHeap::default());
/// let list = FinalizableList::weak(heap.clone()).unwrap();
/// let value = Arc::new("kept".to_string());
///
/// list.add(&value, || {});
/// assert_eq!(list.len(), 1);
/// assert!(list.get(0).unwrap().refers_to(&value));
///
/// list.remove(0).unwrap();
/// assert!(list.is_empty());
/// ```
pub struct FinalizableList<T: Send + Sync + 'static> {
    tier: Tier,
    core: Arc<ListCore<T>>,
    queue: Sender<Handle<T>>,
    manager: Arc<dyn MemoryManager>,
    worker: ReclamationWorker,
}

impl<T: Send + Sync + 'static> FinalizableList<T> {
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

    pub fn with_config(
        tier: Tier,
        manager: Arc<dyn MemoryManager>,
        config: RegistryConfig,
    ) -> RegistryResult<Self> {
        let (queue, reclaimed) = channel::unbounded();
        let core = Arc::new(ListCore {
            state: Mutex::new(ListState {
                handles: Vec::new(),
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
        })
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Create a handle, register its callback and hand it to the manager.
    fn register<F>(&self, state: &mut ListState<T>, value: &Arc<T>, callback: F) -> Handle<T>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = Handle::bind(self.tier, value, &self.queue);
        state
            .descriptor
            .get_or_insert_with(|| TypeDescriptor::of::<T>(self.tier));
        state.callbacks.insert(handle.clone(), Box::new(callback));
        handle
    }

    /// Append a registration for `value`.
    pub fn add<F>(&self, value: &Arc<T>, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = {
            let mut state = self.core.state.lock();
            let handle = self.register(&mut state, value, callback);
            state.handles.push(handle.clone());
            handle
        };
        self.manager.track(handle.as_reclaimable());
    }

    /// Insert a registration at `index`, shifting later entries right.
    pub fn insert<F>(&self, index: usize, value: &Arc<T>, callback: F) -> RegistryResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = {
            let mut state = self.core.state.lock();
            if index > state.handles.len() {
                return Err(RegistryError::index_out_of_range(index, state.handles.len()));
            }
            let handle = self.register(&mut state, value, callback);
            state.handles.insert(index, handle.clone());
            handle
        };
        self.manager.track(handle.as_reclaimable());
        Ok(())
    }

    /// Replace the registration at `index` and return the previous handle.
    ///
    /// The previous callback is abandoned without being invoked.
    pub fn set<F>(&self, index: usize, value: &Arc<T>, callback: F) -> RegistryResult<Handle<T>>
    where
        F: FnOnce() + Send + 'static,
    {
        let (handle, previous, abandoned) = {
            let mut state = self.core.state.lock();
            state.check_index(index)?;
            let handle = self.register(&mut state, value, callback);
            let previous = std::mem::replace(&mut state.handles[index], handle.clone());
            let abandoned = state.callbacks.remove(&previous);
            (handle, previous, abandoned)
        };
        drop(abandoned);
        self.manager.track(handle.as_reclaimable());
        Ok(previous)
    }

    pub fn get(&self, index: usize) -> RegistryResult<Handle<T>> {
        let state = self.core.state.lock();
        state.check_index(index)?;
        Ok(state.handles[index].clone())
    }

    /// Remove the registration at `index` without invoking its callback.
    pub fn remove(&self, index: usize) -> RegistryResult<Handle<T>> {
        let (handle, abandoned) = {
            let mut state = self.core.state.lock();
            state.check_index(index)?;
            let handle = state.handles.remove(index);
            let abandoned = state.callbacks.remove(&handle);
            (handle, abandoned)
        };
        drop(abandoned);
        Ok(handle)
    }

    /// Remove `handle` without invoking its callback.
    ///
    /// Returns false if the handle is not in the list.
    pub fn remove_handle(&self, handle: &Handle<T>) -> bool {
        let abandoned = {
            let mut state = self.core.state.lock();
            let Some(position) = state.handles.iter().position(|h| h == handle) else {
                return false;
            };
            state.handles.remove(position);
            state.callbacks.remove(handle)
        };
        drop(abandoned);
        true
    }

    /// Drop every registration without invoking callbacks.
    pub fn clear(&self) {
        let (handles, callbacks) = {
            let mut state = self.core.state.lock();
            (
                std::mem::take(&mut state.handles),
                std::mem::take(&mut state.callbacks),
            )
        };
        drop(callbacks);
        drop(handles);
    }

    pub fn len(&self) -> usize {
        self.core.state.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the handles in order.
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.core.state.lock().handles.clone()
    }

    /// Iterate over a snapshot of the handles; call again to restart.
    pub fn iter(&self) -> std::vec::IntoIter<Handle<T>> {
        self.handles().into_iter()
    }

    pub fn descriptor(&self) -> Option<TypeDescriptor> {
        self.core.state.lock().descriptor
    }

    pub fn get_stats(&self) -> WorkerStats {
        self.worker.get_stats()
    }
}

impl<T: Send + Sync + fmt::Display + 'static> fmt::Display for FinalizableList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Rendering upgrades handles, so it runs on a snapshot.
        let (descriptor, handles) = {
            let state = self.core.state.lock();
            (state.descriptor, state.handles.clone())
        };
        if let Some(descriptor) = descriptor {
            writeln!(f, "{descriptor}")?;
        }
        if handles.is_empty() {
            return f.write_str("list is empty");
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

impl<T: Send + Sync + 'static> fmt::Debug for FinalizableList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizableList")
            .field("tier", &self.tier)
            .field("len", &self.len())
            .field("worker", &self.worker.name())
            .finish()
    }
}
