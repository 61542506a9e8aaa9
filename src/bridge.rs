//! Async call bridge.
//!
//! The NDI SDK's discovery, capture and send calls block, so they never run on
//! the caller's task. Each call is handed to tokio's blocking thread pool
//! through `spawn_blocking`, with a semaphore bounding how many native calls
//! run at once. Calls against one handle additionally pass through that
//! handle's lane, a fair (FIFO) async mutex, so they execute one at a time in
//! submission order while calls on other handles proceed in parallel.
//!
//! A future dropped while it is still queued (waiting for its lane or a
//! worker permit) never reaches the native layer. Once dispatched, a native
//! call always runs to completion; a timeout is the call's own parameter and
//! yields an empty result rather than an abort.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::registry::{HandleSlot, RawHandle};
use crate::{Error, Result};

pub(crate) struct CallBridge {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl CallBridge {
    pub(crate) fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub(crate) fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `f` on a worker once every earlier call on `slot` has finished.
    ///
    /// The handle is checked after the lane is acquired, so a call queued
    /// behind a release fails with `UseAfterFree`.
    pub(crate) async fn run_on<T, F>(
        &self,
        call: &'static str,
        slot: &Arc<HandleSlot>,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(RawHandle) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let lane = slot.lane().lock_owned().await;
        let raw = slot.raw()?;
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|err| worker_failed(call, err))?;

        let slot = Arc::clone(slot);
        tracing::trace!(call, kind = %slot.kind(), id = slot.id(), "dispatching native call");
        spawn(call, move || {
            let _lane = lane;
            let _permit = permit;
            let result = f(raw);
            if result.is_ok() {
                slot.mark_active();
            }
            result
        })
        .await
    }

    /// Runs `f` on a worker without a per-handle lane. Used for creation,
    /// where no handle exists yet.
    pub(crate) async fn run<T, F>(&self, call: &'static str, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|err| worker_failed(call, err))?;

        tracing::trace!(call, "dispatching native call");
        spawn(call, move || {
            let _permit = permit;
            f()
        })
        .await
    }
}

async fn spawn<T, F>(call: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| worker_failed(call, err))?
}

fn worker_failed(call: &'static str, err: impl std::fmt::Display) -> Error {
    Error::WorkerFailed {
        call,
        message: err.to_string(),
    }
}
