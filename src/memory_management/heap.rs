//! Reference-counted heap that decides when tracked handles are reclaimed
//!
//! `ManagedHeap` implements [`MemoryManager`] on top of `Arc` strong counts.
//! A weak or phantom handle becomes reclaimable once its value has no strong
//! holder left. A soft handle pins its value and is only released when the
//! heap runs short of capacity.
//!
//! ## Passes
//!
//! - **Ordinary collection** ([`ManagedHeap::collect`]): weak and phantom handles
//!   whose values are unreachable are cleared and enqueued.
//! - **Pressure collection** ([`ManagedHeap::collect_under_pressure`]): soft pins
//!   that are the sole holder of their value are released as well.
//! - **Allocation** ([`ManagedHeap::allocate`]): reserves simulated capacity,
//!   escalating through both passes before reporting exhaustion.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{RegistryError, RegistryResult};
use crate::interfaces::{MemoryManager, Reclaimable};
use crate::types::{HandleId, HeapConfig, Tier};

/// Simulated allocation returned by [`ManagedHeap::allocate`].
///
/// The reserved bytes are returned to the heap when the reservation is dropped.
#[derive(Debug)]
pub struct Reservation {
    bytes: usize,
    used: Arc<AtomicUsize>,
}

impl Reservation {
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.used.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

struct CollectorThread {
    shutdown: Sender<()>,
    thread: JoinHandle<()>,
}

/// Heap statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Handles currently tracked and not yet reclaimed
    pub tracked: usize,
    /// Handles ever tracked
    pub total_tracked: usize,
    /// Handles cleared and enqueued
    pub total_reclaimed: usize,
    /// Soft handles released under pressure
    pub soft_cleared: usize,
    /// Reclamation passes run
    pub collections: usize,
    /// Allocations that failed after every pass
    pub allocation_failures: usize,
    pub used_bytes: usize,
    pub capacity_bytes: usize,
}

/// Memory manager backed by reference counts and a simulated capacity.
///
/// # Examples
///
/// ```
/// use finref::{FinalizableSet, HeapConfig, ManagedHeap};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// let heap = Arc::new(ManagedHeap::new(HeapConfig::default()));
/// let set = FinalizableSet::weak(heap.clone()).unwrap();
///
/// let fired = Arc::new(AtomicBool::new(false));
/// let flag = Arc::clone(&fired);
/// let value = Arc::new("transient".to_string());
/// set.add(&value, move || flag.store(true, Ordering::SeqCst));
///
/// drop(value);
/// assert_eq!(heap.collect(), 1);
/// ```
pub struct ManagedHeap {
    config: HeapConfig,
    /// Handles under observation; the heap never keeps a handle alive
    tracked: DashMap<HandleId, Weak<dyn Reclaimable>>,
    used_bytes: Arc<AtomicUsize>,
    total_tracked: AtomicUsize,
    total_reclaimed: AtomicUsize,
    soft_cleared: AtomicUsize,
    collections: AtomicUsize,
    allocation_failures: AtomicUsize,
    collector: Mutex<Option<CollectorThread>>,
}

impl ManagedHeap {
    pub fn new(config: HeapConfig) -> Self {
        Self {
            config,
            tracked: DashMap::new(),
            used_bytes: Arc::new(AtomicUsize::new(0)),
            total_tracked: AtomicUsize::new(0),
            total_reclaimed: AtomicUsize::new(0),
            soft_cleared: AtomicUsize::new(0),
            collections: AtomicUsize::new(0),
            allocation_failures: AtomicUsize::new(0),
            collector: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Reclaim weak and phantom handles whose values have no strong holder.
    ///
    /// Soft handles survive. Returns the number of handles enqueued.
    pub fn collect(&self) -> usize {
        self.reclaim_pass(false)
    }

    /// Like [`collect`](Self::collect), but also releases soft values whose
    /// only holder is their handle.
    pub fn collect_under_pressure(&self) -> usize {
        self.reclaim_pass(true)
    }

    fn reclaim_pass(&self, under_pressure: bool) -> usize {
        self.collections.fetch_add(1, Ordering::Relaxed);

        // Snapshot first: clearing a soft pin runs the value's destructor,
        // which may re-enter the heap.
        let mut live = Vec::new();
        let mut dropped = Vec::new();
        for entry in self.tracked.iter() {
            match entry.value().upgrade() {
                Some(handle) => live.push(handle),
                None => dropped.push(*entry.key()),
            }
        }
        for id in dropped {
            self.tracked.remove(&id);
        }

        let mut reclaimed = 0;
        for handle in live {
            let tier = handle.tier();
            if tier == Tier::Soft && !under_pressure {
                continue;
            }
            if !handle.clear_if_unreachable() {
                continue;
            }

            let id = handle.id();
            self.tracked.remove(&id);
            if tier == Tier::Soft {
                self.soft_cleared.fetch_add(1, Ordering::Relaxed);
            }
            if handle.enqueue() {
                log::trace!("reclaimed {tier} handle {id}");
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            self.total_reclaimed.fetch_add(reclaimed, Ordering::Relaxed);
        }
        reclaimed
    }

    /// Reserve `bytes` of simulated capacity.
    ///
    /// On shortfall the heap runs an ordinary collection, then a pressure
    /// collection that releases soft values, retrying after each. Soft
    /// callbacks are therefore enqueued before exhaustion is reported.
    pub fn allocate(&self, bytes: usize) -> RegistryResult<Reservation> {
        if let Some(reservation) = self.try_reserve(bytes) {
            return Ok(reservation);
        }

        self.collect();
        if let Some(reservation) = self.try_reserve(bytes) {
            return Ok(reservation);
        }

        let released = self.collect_under_pressure();
        log::debug!("allocation of {bytes} bytes forced a pressure collection ({released} reclaimed)");
        if let Some(reservation) = self.try_reserve(bytes) {
            return Ok(reservation);
        }

        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
        let available = self.available_bytes();
        log::warn!("heap exhausted: requested {bytes} bytes, {available} available");
        Err(RegistryError::ResourceExhausted {
            requested: bytes,
            available,
        })
    }

    fn try_reserve(&self, bytes: usize) -> Option<Reservation> {
        let capacity = self.config.capacity_bytes;
        self.used_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= capacity)
            })
            .ok()
            .map(|_| Reservation {
                bytes,
                used: Arc::clone(&self.used_bytes),
            })
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::Acquire)
    }

    pub fn available_bytes(&self) -> usize {
        self.config.capacity_bytes.saturating_sub(self.used_bytes())
    }

    /// Number of handles tracked and not yet reclaimed
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Start a background thread running [`collect`](Self::collect) every
    /// `collect_interval`.
    ///
    /// Returns `Ok(false)` if no interval is configured or a collector is
    /// already running. The thread only holds a weak reference to the heap.
    pub fn start_collector(self: &Arc<Self>) -> RegistryResult<bool> {
        let Some(interval) = self.config.collect_interval else {
            return Ok(false);
        };

        let mut slot = self.collector.lock();
        if slot.is_some() {
            return Ok(false);
        }

        let (shutdown, shutdown_receiver) = channel::bounded::<()>(0);
        let heap = Arc::downgrade(self);
        let ticker = channel::tick(interval);

        let thread = thread::Builder::new()
            .name("finref-collector".to_string())
            .spawn(move || {
                loop {
                    crossbeam::select! {
                        recv(ticker) -> _ => match heap.upgrade() {
                            Some(heap) => {
                                heap.collect();
                            }
                            None => break,
                        },
                        recv(shutdown_receiver) -> _ => break,
                    }
                }
                log::debug!("heap collector stopped");
            })?;

        log::debug!("started heap collector every {interval:?}");
        *slot = Some(CollectorThread { shutdown, thread });
        Ok(true)
    }

    /// Stop the background collector. Returns false if none was running.
    pub fn stop_collector(&self) -> bool {
        let Some(CollectorThread { shutdown, thread }) = self.collector.lock().take() else {
            return false;
        };
        drop(shutdown);

        // The last strong reference may be released by the collector itself.
        if thread.thread().id() != thread::current().id() {
            if let Err(e) = thread.join() {
                log::error!("heap collector failed to join cleanly: {:?}", e);
            }
        }
        true
    }

    pub fn is_collector_running(&self) -> bool {
        self.collector.lock().is_some()
    }

    pub fn get_stats(&self) -> HeapStats {
        HeapStats {
            tracked: self.tracked.len(),
            total_tracked: self.total_tracked.load(Ordering::Relaxed),
            total_reclaimed: self.total_reclaimed.load(Ordering::Relaxed),
            soft_cleared: self.soft_cleared.load(Ordering::Relaxed),
            collections: self.collections.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            used_bytes: self.used_bytes(),
            capacity_bytes: self.config.capacity_bytes,
        }
    }
}

impl MemoryManager for ManagedHeap {
    fn track(&self, handle: Arc<dyn Reclaimable>) {
        self.tracked.insert(handle.id(), Arc::downgrade(&handle));
        self.total_tracked.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for ManagedHeap {
    fn default() -> Self {
        Self::new(HeapConfig::default())
    }
}

impl Drop for ManagedHeap {
    fn drop(&mut self) {
        self.stop_collector();
    }
}
