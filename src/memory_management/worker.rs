//! Reclamation worker: the single consumer of a registry's reclamation queue
//!
//! The worker blocks on the queue and, for every reclaimed handle, takes the
//! handle's callback out of the owning registry and runs it. Teardown closes a
//! dedicated shutdown channel, which wakes a blocked receive immediately.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use super::handle::Handle;
use crate::error::RegistryResult;

/// A one-shot callback fired when its handle is reclaimed
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Registry side of the worker protocol.
pub(crate) trait CallbackStore<T>: Send + Sync + 'static {
    /// Remove the registration for `handle` and return its callback.
    ///
    /// Returns `None` if the registration was already removed explicitly.
    fn take_callback(&self, handle: &Handle<T>) -> Option<Callback>;
}

#[derive(Debug, Default)]
struct WorkerCounters {
    fired: AtomicUsize,
    ignored: AtomicUsize,
    panicked: AtomicUsize,
}

/// Statistics for a reclamation worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerStats {
    /// Callbacks invoked, including ones that panicked
    pub fired: usize,
    /// Notifications whose registration was already gone
    pub ignored: usize,
    /// Callbacks that panicked
    pub panicked: usize,
}

/// Background thread draining one reclamation queue.
#[derive(Debug)]
pub struct ReclamationWorker {
    name: String,
    shutdown: Mutex<Option<Sender<()>>>,
    /// Held for the whole join, so concurrent stops return together
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    counters: Arc<WorkerCounters>,
}

impl ReclamationWorker {
    /// Spawn a worker consuming `queue` on behalf of `store`.
    pub(crate) fn spawn<T, S>(
        name: &str,
        queue: Receiver<Handle<T>>,
        store: Arc<S>,
    ) -> RegistryResult<Self>
    where
        T: Send + Sync + 'static,
        S: CallbackStore<T>,
    {
        let (shutdown_sender, shutdown_receiver) = channel::bounded::<()>(0);
        let counters = Arc::new(WorkerCounters::default());
        let thread_counters = Arc::clone(&counters);

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    crossbeam::select! {
                        recv(queue) -> msg => match msg {
                            Ok(handle) => dispatch(&*store, handle, &thread_counters),
                            Err(_) => break,
                        },
                        recv(shutdown_receiver) -> _ => break,
                    }
                }
                log::debug!("{} stopped", thread::current().name().unwrap_or("reclamation worker"));
            })?;

        log::debug!("started reclamation worker {name}");

        Ok(Self {
            name: name.to_string(),
            shutdown: Mutex::new(Some(shutdown_sender)),
            thread_id: thread.thread().id(),
            thread: Mutex::new(Some(thread)),
            counters,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.lock().is_some()
    }

    /// Stop the worker and wait for its thread to exit.
    ///
    /// Pending notifications are not drained. Returns false if the worker was
    /// already signalled, but still waits for it to exit, so every caller
    /// observes a stopped worker on return. When called from the worker
    /// thread itself (a callback tearing down its own registry) the thread is
    /// only signalled and exits once the callback returns.
    pub fn stop(&self) -> bool {
        if thread::current().id() == self.thread_id {
            let signalled = self.shutdown.lock().take().is_some();
            if signalled {
                log::debug!("{} stopping from its own callback", self.name);
            }
            return signalled;
        }

        let mut slot = self.thread.lock();
        let signalled = self.shutdown.lock().take().is_some();
        if let Some(thread) = slot.take() {
            if let Err(e) = thread.join() {
                log::error!("{} failed to join cleanly: {:?}", self.name, e);
            }
        }
        signalled
    }

    pub fn get_stats(&self) -> WorkerStats {
        WorkerStats {
            fired: self.counters.fired.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ReclamationWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch<T, S>(store: &S, handle: Handle<T>, counters: &WorkerCounters)
where
    S: CallbackStore<T> + ?Sized,
{
    let Some(callback) = store.take_callback(&handle) else {
        log::trace!("ignoring reclaimed handle {} with no registration", handle.id());
        counters.ignored.fetch_add(1, Ordering::Relaxed);
        return;
    };

    // The handle is released before the callback runs.
    let (id, age) = (handle.id(), handle.age());
    drop(handle);

    counters.fired.fetch_add(1, Ordering::Relaxed);
    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        counters.panicked.fetch_add(1, Ordering::Relaxed);
        log::error!("callback for reclaimed handle {id} panicked");
    } else {
        log::trace!("fired callback for reclaimed handle {id} after {age:?}");
    }
}
