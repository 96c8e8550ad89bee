//! Tracked references with weak, soft and phantom reclamation tiers
//!
//! A [`Handle`] is an identity token bound to one value, one tier and one
//! reclamation queue. The memory manager clears it when the value becomes
//! unreachable under its tier's policy and pushes it onto the queue once.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::{RegistryError, RegistryResult};
use crate::interfaces::Reclaimable;
use crate::types::{HandleId, Tier};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

type PinSlot = Weak<dyn Any + Send + Sync>;

/// Live soft pins keyed by the address of the value they hold.
static SOFT_PINS: Lazy<DashMap<usize, PinSlot>> = Lazy::new(DashMap::new);

/// Strong reference shared by every soft handle of one value.
///
/// All soft handles of a value hold the same pin, so together they account
/// for exactly one strong count and never keep each other reachable.
struct SoftPin<T> {
    key: usize,
    value: Mutex<Option<Arc<T>>>,
}

impl<T: Send + Sync + 'static> SoftPin<T> {
    /// Join the pin already holding `value`, or install a new one.
    fn acquire(value: &Arc<T>) -> Arc<Self> {
        let key = Arc::as_ptr(value) as usize;
        let mut stale: Option<Arc<dyn Any + Send + Sync>> = None;

        let pin = {
            let mut slot = SOFT_PINS
                .entry(key)
                .or_insert_with(|| Weak::<Self>::new() as PinSlot);
            let shared = slot.upgrade().and_then(|pin| match pin.downcast::<Self>() {
                Ok(pin) if pin.holds(value) => Some(pin),
                Ok(spent) => {
                    stale = Some(spent as Arc<dyn Any + Send + Sync>);
                    None
                }
                Err(foreign) => {
                    stale = Some(foreign);
                    None
                }
            });
            shared.unwrap_or_else(|| {
                let pin = Arc::new(Self {
                    key,
                    value: Mutex::new(Some(Arc::clone(value))),
                });
                *slot = Arc::downgrade(&pin) as PinSlot;
                pin
            })
        };

        // Dropping the last reference to a pin re-enters the table.
        drop(stale);
        pin
    }

    fn holds(&self, value: &Arc<T>) -> bool {
        self.value
            .lock()
            .as_ref()
            .is_some_and(|pinned| Arc::ptr_eq(pinned, value))
    }
}

impl<T> Drop for SoftPin<T> {
    fn drop(&mut self) {
        SOFT_PINS.remove_if(&self.key, |_, slot| slot.strong_count() == 0);
    }
}

/// Tracked reference to a value, compared by identity.
///
/// Weak and soft handles yield their value until they are cleared. Phantom
/// handles never yield it.
///
/// # Examples
///
/// ```
/// use finref::{Handle, Tier};
/// use std::sync::Arc;
///
/// let (queue, _reclaimed) = crossbeam::channel::unbounded();
/// let value = Arc::new(42);
///
/// let weak = Handle::create(Tier::Weak, Some(&value), &queue).unwrap();
/// assert_eq!(weak.get().as_deref(), Some(&42));
///
/// let phantom = Handle::create(Tier::Phantom, Some(&value), &queue).unwrap();
/// assert!(phantom.get().is_none());
///
/// assert!(Handle::<i32>::create(Tier::Weak, None, &queue).is_err());
/// ```
pub struct Handle<T> {
    inner: Arc<HandleInner<T>>,
}

struct HandleInner<T> {
    id: HandleId,
    tier: Tier,
    /// Non-owning pointer to the value, for every tier
    target: Weak<T>,
    /// Keeps a soft value alive until memory pressure
    soft_pin: Option<Arc<SoftPin<T>>>,
    cleared: AtomicBool,
    enqueued: AtomicBool,
    queue: Sender<Handle<T>>,
    created_at: Instant,
}

impl<T: Send + Sync + 'static> Handle<T> {
    /// Create a handle for `value` bound to `queue`.
    ///
    /// Fails with [`RegistryError::InvalidValue`] when no value is given.
    pub fn create(
        tier: Tier,
        value: Option<&Arc<T>>,
        queue: &Sender<Handle<T>>,
    ) -> RegistryResult<Self> {
        let value = value.ok_or(RegistryError::InvalidValue)?;
        Ok(Self::bind(tier, value, queue))
    }

    pub(crate) fn bind(tier: Tier, value: &Arc<T>, queue: &Sender<Handle<T>>) -> Self {
        let soft_pin = match tier {
            Tier::Soft => Some(SoftPin::acquire(value)),
            Tier::Weak | Tier::Phantom => None,
        };

        Self {
            inner: Arc::new(HandleInner {
                id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
                tier,
                target: Arc::downgrade(value),
                soft_pin,
                cleared: AtomicBool::new(false),
                enqueued: AtomicBool::new(false),
                queue: queue.clone(),
                created_at: Instant::now(),
            }),
        }
    }

    /// Type-erased view handed to the memory manager.
    pub(crate) fn as_reclaimable(&self) -> Arc<dyn Reclaimable> {
        self.inner.clone()
    }
}

impl<T> Handle<T> {
    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    pub fn tier(&self) -> Tier {
        self.inner.tier
    }

    /// Get the value if it is still reachable through this handle.
    ///
    /// Always `None` for phantom handles, even before reclamation.
    pub fn get(&self) -> Option<Arc<T>> {
        let inner = &self.inner;
        if !inner.tier.exposes_value() || self.is_cleared() {
            return None;
        }
        match &inner.soft_pin {
            Some(pin) => pin.value.lock().clone(),
            None => inner.target.upgrade(),
        }
    }

    /// Whether this handle currently yields exactly `value` (by identity).
    ///
    /// Never upgrades the handle, so no destructor can run inside the call.
    /// The handle's own weak reference keeps the allocation reserved, so an
    /// address match always means the same value.
    pub fn refers_to(&self, value: &Arc<T>) -> bool {
        self.inner.tier.exposes_value()
            && !self.is_cleared()
            && ptr::eq(self.inner.target.as_ptr(), Arc::as_ptr(value))
    }

    /// Whether the memory manager has severed this handle from its value
    pub fn is_cleared(&self) -> bool {
        self.inner.cleared.load(Ordering::Acquire)
    }

    /// Whether this handle has been pushed onto its reclamation queue
    pub fn is_enqueued(&self) -> bool {
        self.inner.enqueued.load(Ordering::Acquire)
    }

    /// Time since the handle was created
    pub fn age(&self) -> Duration {
        self.inner.created_at.elapsed()
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.inner.id)
            .field("tier", &self.inner.tier)
            .field("cleared", &self.is_cleared())
            .field("enqueued", &self.is_enqueued())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Reclaimable for HandleInner<T> {
    fn id(&self) -> HandleId {
        self.id
    }

    fn tier(&self) -> Tier {
        self.tier
    }

    fn is_strongly_reachable(&self) -> bool {
        let pinned = match &self.soft_pin {
            Some(pin) => usize::from(pin.value.lock().is_some()),
            None => 0,
        };
        self.target.strong_count() > pinned
    }

    fn clear_if_unreachable(&self) -> bool {
        if self.cleared.load(Ordering::Acquire) {
            return true;
        }

        match &self.soft_pin {
            Some(pin) => {
                // Every soft handle of the value shares this slot; the first
                // one to clear empties it for the rest.
                let mut slot = pin.value.lock();
                let sole_holder = slot
                    .as_ref()
                    .is_none_or(|value| Arc::strong_count(value) == 1);
                if !sole_holder {
                    return false;
                }
                let released = slot.take();
                self.cleared.store(true, Ordering::Release);
                drop(slot);
                // The value's destructor runs outside the pin lock.
                drop(released);
                true
            }
            None => {
                // Strong count never rises again once it reaches zero.
                if self.target.strong_count() > 0 {
                    return false;
                }
                self.cleared.store(true, Ordering::Release);
                true
            }
        }
    }

    fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::Acquire)
    }

    fn is_enqueued(&self) -> bool {
        self.enqueued.load(Ordering::Acquire)
    }

    fn enqueue(self: Arc<Self>) -> bool {
        if self.enqueued.swap(true, Ordering::AcqRel) {
            return false;
        }
        let queue = self.queue.clone();
        queue.send(Handle { inner: self }).is_ok()
    }
}
