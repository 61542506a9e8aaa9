//! Native handle registry.
//!
//! Every finder, receiver, sender and routing instance created through the
//! crate is registered here in creation order. The registry guarantees that a
//! native handle is destroyed at most once, turns late use into
//! [`Error::UseAfterFree`], and tears everything down newest-first when the
//! runtime is destroyed.

use std::ffi::c_void;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Error, Result};

/// The kind of native resource behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Finder,
    Receiver,
    Sender,
    Routing,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandleKind::Finder => "find",
            HandleKind::Receiver => "receive",
            HandleKind::Sender => "send",
            HandleKind::Routing => "routing",
        })
    }
}

/// Lifecycle of a resource wrapper.
///
/// `Created` becomes `Active` after the first successful call; `Released` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Created,
    Active,
    Released,
}

const STATE_CREATED: u8 = 0;
const STATE_ACTIVE: u8 = 1;
const STATE_RELEASED: u8 = 2;

/// An opaque native instance pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawHandle(pub(crate) *mut c_void);

// SAFETY: NDI instances may be used from any thread as long as calls on one
// instance do not overlap, which the per-handle lane enforces.
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

type Finalizer = Box<dyn FnOnce(RawHandle) + Send>;

/// One registered native handle.
pub(crate) struct HandleSlot {
    id: u64,
    kind: HandleKind,
    raw: RawHandle,
    state: AtomicU8,
    // Received frames still borrowing native memory owned by this handle.
    pins: AtomicUsize,
    release_requested: AtomicBool,
    finalizer: Mutex<Option<Finalizer>>,
    lane: Arc<tokio::sync::Mutex<()>>,
}

impl HandleSlot {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn kind(&self) -> HandleKind {
        self.kind
    }

    pub(crate) fn state(&self) -> ResourceState {
        match self.state.load(Ordering::SeqCst) {
            STATE_CREATED => ResourceState::Created,
            STATE_ACTIVE => ResourceState::Active,
            _ => ResourceState::Released,
        }
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.lane.try_lock().is_err()
    }

    /// The per-handle FIFO lane that serializes native calls.
    pub(crate) fn lane(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.lane)
    }

    /// Returns the native pointer, or `UseAfterFree` once released.
    pub(crate) fn raw(&self) -> Result<RawHandle> {
        if self.state.load(Ordering::SeqCst) == STATE_RELEASED {
            return Err(self.use_after_free());
        }
        Ok(self.raw)
    }

    pub(crate) fn mark_active(&self) {
        let _ = self.state.compare_exchange(
            STATE_CREATED,
            STATE_ACTIVE,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub(crate) fn pin(&self) {
        self.pins.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn pinned(&self) -> usize {
        self.pins.load(Ordering::SeqCst)
    }

    /// Asks whichever call currently holds the lane to release the handle
    /// when it finishes.
    pub(crate) fn request_release(&self) {
        self.release_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_release_request(&self) -> bool {
        self.release_requested.swap(false, Ordering::SeqCst)
    }

    /// Drops one frame borrow; the last one out finalizes a released handle.
    pub(crate) fn unpin(&self) {
        let previous = self.pins.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.state.load(Ordering::SeqCst) == STATE_RELEASED {
            if let Err(err) = self.finalize() {
                tracing::warn!(kind = %self.kind, id = self.id, %err, "deferred release failed");
            }
        }
    }

    /// Moves the slot to `Released` and destroys the native handle unless a
    /// received frame still borrows it.
    fn retire(&self) -> Result<()> {
        let previous = self.state.swap(STATE_RELEASED, Ordering::SeqCst);
        if previous == STATE_RELEASED {
            return Err(self.use_after_free());
        }
        if self.pins.load(Ordering::SeqCst) == 0 {
            self.finalize()
        } else {
            tracing::debug!(
                kind = %self.kind,
                id = self.id,
                frames = self.pinned(),
                "release deferred until outstanding frames are freed"
            );
            Ok(())
        }
    }

    fn finalize(&self) -> Result<()> {
        let finalizer = lock(&self.finalizer).take();
        let Some(finalizer) = finalizer else {
            return Ok(());
        };
        let raw = self.raw;
        panic::catch_unwind(AssertUnwindSafe(move || finalizer(raw))).map_err(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "native destroy panicked".to_string());
            Error::native("destroy", message)
        })?;
        tracing::debug!(kind = %self.kind, id = self.id, "native handle destroyed");
        Ok(())
    }

    fn use_after_free(&self) -> Error {
        Error::UseAfterFree {
            kind: self.kind,
            id: self.id,
        }
    }
}

impl fmt::Debug for HandleSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleSlot")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("pins", &self.pinned())
            .finish()
    }
}

/// Creation-ordered set of live handles behind a single lock.
#[derive(Default)]
pub(crate) struct HandleRegistry {
    slots: Mutex<Vec<Arc<HandleSlot>>>,
    next_id: AtomicU64,
}

impl HandleRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records a freshly created native handle. `finalizer` runs exactly once
    /// when the handle is released.
    pub(crate) fn register(
        &self,
        kind: HandleKind,
        raw: RawHandle,
        finalizer: impl FnOnce(RawHandle) + Send + 'static,
    ) -> Arc<HandleSlot> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let slot = Arc::new(HandleSlot {
            id,
            kind,
            raw,
            state: AtomicU8::new(STATE_CREATED),
            pins: AtomicUsize::new(0),
            release_requested: AtomicBool::new(false),
            finalizer: Mutex::new(Some(Box::new(finalizer))),
            lane: Arc::new(tokio::sync::Mutex::new(())),
        });
        lock(&self.slots).push(Arc::clone(&slot));
        tracing::debug!(%kind, id, "native handle registered");
        slot
    }

    /// Releases one handle. A second release fails with `UseAfterFree`.
    ///
    /// The caller must hold the slot's lane so no native call is in flight.
    pub(crate) fn release(&self, slot: &HandleSlot) -> Result<()> {
        let result = slot.retire();
        lock(&self.slots).retain(|s| s.id != slot.id);
        result
    }

    /// Number of handles not yet released.
    pub(crate) fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    /// Removes every live handle, newest first.
    pub(crate) fn drain_lifo(&self) -> Vec<Arc<HandleSlot>> {
        let mut slots = std::mem::take(&mut *lock(&self.slots));
        slots.reverse();
        slots
    }

    /// Force-releases every live handle in reverse creation order, waiting for
    /// each handle's in-flight call to finish first. Individual failures are
    /// logged and skipped.
    pub(crate) async fn destroy_all(&self) -> TeardownReport {
        let mut report = TeardownReport::default();
        for slot in self.drain_lifo() {
            let _lane = slot.lane().lock_owned().await;
            report.record(&slot);
        }
        report
    }

    /// Synchronous teardown for when no call can be in flight.
    pub(crate) fn destroy_all_now(&self) -> TeardownReport {
        let mut report = TeardownReport::default();
        for slot in self.drain_lifo() {
            report.record(&slot);
        }
        report
    }
}

/// Outcome of a registry teardown.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TeardownReport {
    pub(crate) released: usize,
    pub(crate) failed: usize,
    /// Released handles whose native destroy waits on outstanding frames.
    pub(crate) deferred: usize,
}

impl TeardownReport {
    fn record(&mut self, slot: &HandleSlot) {
        match slot.retire() {
            Ok(()) => {
                self.released += 1;
                if slot.pinned() > 0 {
                    self.deferred += 1;
                }
            }
            Err(err) => {
                self.failed += 1;
                tracing::warn!(kind = %slot.kind, id = slot.id, %err, "release failed during teardown");
            }
        }
    }
}

/// Locks a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
