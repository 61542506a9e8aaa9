//! NDI runtime context: library lifetime, global teardown and the plumbing
//! every resource wrapper shares.

use std::ffi::CStr;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use serde_json::Value;

use crate::bridge::CallBridge;
use crate::config::BridgeConfig;
use crate::finder::{Finder, FinderOptions, Source};
use crate::receiver::{Receiver, ReceiverOptions};
use crate::registry::{lock, HandleKind, HandleRegistry, HandleSlot, RawHandle, ResourceState};
use crate::routing::{Routing, RoutingOptions};
use crate::sdk::{self, NdiApi};
use crate::sender::{Sender, SenderOptions};
use crate::{Error, Result};

/// State of the NDI runtime lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// `NDIlib_initialize` has not succeeded yet, or the runtime was destroyed.
    Uninitialized,
    /// Another thread is running `NDIlib_initialize`.
    Initializing,
    Initialized,
    /// `destroy()` is releasing handles.
    Destroying,
}

pub(crate) struct Context {
    pub(crate) api: Arc<dyn NdiApi>,
    pub(crate) registry: HandleRegistry,
    pub(crate) bridge: CallBridge,
    pub(crate) config: BridgeConfig,
    state: Mutex<State>,
    cv: Condvar,
    // Held shared by every creation until its handle is registered; destroy()
    // takes it exclusively so no creation straddles teardown.
    creations: Arc<tokio::sync::RwLock<()>>,
    // Set when destroy() left frames outstanding; NDIlib_destroy then runs
    // once the last frame (and with it the last context reference) is gone.
    destroy_pending: AtomicBool,
}

impl Context {
    fn initialize(&self) -> bool {
        let mut state = lock(&self.state);
        loop {
            match *state {
                State::Initialized => return true,
                State::Destroying => {
                    tracing::warn!("initialize() called while the runtime is being destroyed");
                    return false;
                }
                State::Initializing => {
                    state = self
                        .cv
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                State::Uninitialized => {
                    if self.destroy_pending.swap(false, Ordering::SeqCst) {
                        // The native runtime was never torn down.
                        *state = State::Initialized;
                        return true;
                    }
                    *state = State::Initializing;
                    drop(state);

                    // SAFETY: NDIlib_initialize has no preconditions.
                    let ok = unsafe { self.api.initialize() };

                    state = lock(&self.state);
                    *state = if ok {
                        State::Initialized
                    } else {
                        State::Uninitialized
                    };
                    self.cv.notify_all();
                    if ok {
                        tracing::debug!("NDI runtime initialized");
                    } else {
                        tracing::warn!("NDIlib_initialize failed");
                    }
                    return ok;
                }
            }
        }
    }

    fn is_initialized(&self) -> bool {
        *lock(&self.state) == State::Initialized
    }

    pub(crate) fn ensure_initialized(&self, kind: HandleKind) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::CreationError {
                kind,
                message: "the NDI runtime is not initialized".into(),
            })
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let report = self.registry.destroy_all_now();
        if report.released > 0 {
            tracing::debug!(released = report.released, "released handles at context drop");
        }
        let state = *lock(&self.state);
        if state == State::Initialized || self.destroy_pending.load(Ordering::SeqCst) {
            // SAFETY: every handle created through this context is gone.
            unsafe { self.api.destroy() };
            tracing::debug!("NDI runtime destroyed");
        }
    }
}

/// Manages the NDI runtime lifecycle.
///
/// `Ndi` is the entry point for all NDI operations. It owns the native
/// function table, the handle registry and the worker pool that runs blocking
/// calls. Clones are cheap and share all of it.
///
/// # Examples
///
/// ```no_run
/// use ndi_bridge::Ndi;
///
/// # async fn run() -> Result<(), ndi_bridge::Error> {
/// let ndi = Ndi::new()?;
/// println!("NDI {}", ndi.version()?);
///
/// for source in ndi.find(None, None).await? {
///     println!("Found: {source}");
/// }
///
/// // Releases every finder, receiver, sender and routing instance still alive.
/// ndi.destroy().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Ndi {
    pub(crate) inner: Arc<Context>,
}

impl Ndi {
    /// Loads the NDI runtime using [`BridgeConfig::from_env`] and initializes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InitializationFailed`] if the library cannot be loaded or
    /// `NDIlib_initialize` fails (typically an unsupported CPU).
    pub fn new() -> Result<Self> {
        Self::with_config(BridgeConfig::from_env()?)
    }

    /// Loads the NDI runtime with an explicit configuration.
    pub fn with_config(config: BridgeConfig) -> Result<Self> {
        let api = sdk::shared(config.library_path.as_deref())?;
        Self::with_api(api, config)
    }

    /// Builds a context over any implementation of the native function table.
    pub fn with_api(api: Arc<dyn NdiApi>, config: BridgeConfig) -> Result<Self> {
        let ndi = Self {
            inner: Arc::new(Context {
                api,
                registry: HandleRegistry::new(),
                bridge: CallBridge::new(config.worker_threads),
                config,
                state: Mutex::new(State::Uninitialized),
                cv: Condvar::new(),
                creations: Arc::new(tokio::sync::RwLock::new(())),
                destroy_pending: AtomicBool::new(false),
            }),
        };
        if !ndi.initialize() {
            return Err(Error::InitializationFailed(
                "NDIlib_initialize failed; the CPU may not be supported".into(),
            ));
        }
        Ok(ndi)
    }

    /// Initializes the native runtime if needed. Returns whether it is usable.
    pub fn initialize(&self) -> bool {
        self.inner.initialize()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.is_initialized()
    }

    /// Global teardown: releases every outstanding handle newest-first, then
    /// shuts the native runtime down.
    ///
    /// Calls in flight on a handle finish before it is released, and a
    /// creation already running on a worker is registered and then released
    /// with the rest. Creations requested after this point fail. Release
    /// failures are logged, never returned. If received frames are still
    /// alive, the native shutdown waits until they have been dropped. Resource
    /// wrappers outliving this call fail with [`Error::UseAfterFree`].
    pub async fn destroy(&self) {
        {
            let mut state = lock(&self.inner.state);
            if *state != State::Initialized {
                return;
            }
            *state = State::Destroying;
        }

        // Creations already past the state check register their handles
        // first; later ones see `Destroying` and fail.
        let _creations = self.inner.creations.write().await;
        let report = self.inner.registry.destroy_all().await;
        tracing::debug!(
            released = report.released,
            failed = report.failed,
            deferred = report.deferred,
            "released outstanding handles"
        );

        if report.deferred == 0 {
            // SAFETY: every registered handle has been destroyed.
            unsafe { self.inner.api.destroy() };
            tracing::debug!("NDI runtime destroyed");
        } else {
            tracing::warn!(
                handles = report.deferred,
                "received frames still alive; NDI runtime shutdown deferred"
            );
            self.inner.destroy_pending.store(true, Ordering::SeqCst);
        }

        *lock(&self.inner.state) = State::Uninitialized;
        self.inner.cv.notify_all();
    }

    /// Checks if the current CPU is supported by the NDI SDK.
    pub fn is_supported_cpu(&self) -> bool {
        // SAFETY: no preconditions.
        unsafe { self.inner.api.is_supported_cpu() }
    }

    /// Returns the version string of the NDI runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the SDK returns no string or the string is not
    /// valid UTF-8.
    pub fn version(&self) -> Result<String> {
        // SAFETY: NDIlib_version returns a static NUL-terminated string.
        let ptr = unsafe { self.inner.api.version() };
        if ptr.is_null() {
            return Err(Error::native("NDIlib_version", "returned no version string"));
        }
        // SAFETY: checked non-null above; the string is static in the library.
        let version = unsafe { CStr::from_ptr(ptr) };
        version
            .to_str()
            .map(str::to_owned)
            .map_err(|err| Error::InvalidUtf8(err.to_string()))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Number of native handles not yet released.
    pub fn live_handles(&self) -> usize {
        self.inner.registry.len()
    }

    /// Creates a [`Finder`]. `None` takes the SDK's no-argument path.
    pub async fn finder(&self, options: Option<&FinderOptions>) -> Result<Finder> {
        Finder::new(self, options).await
    }

    /// One-shot discovery: creates a finder, waits up to `timeout_ms`
    /// (default [`BridgeConfig::default_find_timeout_ms`]) for the source list
    /// to settle, snapshots it and releases the finder.
    pub async fn find(
        &self,
        options: Option<&FinderOptions>,
        timeout_ms: Option<u32>,
    ) -> Result<Vec<Source>> {
        let timeout_ms = timeout_ms.unwrap_or(self.inner.config.default_find_timeout_ms);
        let finder = Finder::new(self, options).await?;
        finder.wait_for_sources(timeout_ms).await?;
        let sources = finder.sources().await?;
        finder.release().await?;
        Ok(sources)
    }

    /// [`Ndi::find`] for a scripting-host option bag.
    pub async fn find_value(&self, options: Option<&Value>) -> Result<Vec<Source>> {
        match options {
            None | Some(Value::Null) => self.find(None, None).await,
            Some(raw) => {
                let options = FinderOptions::from_value(raw)?;
                self.find(Some(&options), None).await
            }
        }
    }

    pub async fn receiver(&self, options: &ReceiverOptions) -> Result<Receiver> {
        Receiver::new(self, options).await
    }

    pub async fn sender(&self, options: &SenderOptions) -> Result<Sender> {
        Sender::new(self, options).await
    }

    pub async fn routing(&self, options: &RoutingOptions) -> Result<Routing> {
        Routing::new(self, options).await
    }
}

impl fmt::Debug for Ndi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ndi")
            .field("state", &*lock(&self.inner.state))
            .field("live_handles", &self.inner.registry.len())
            .field("workers", &self.inner.bridge.workers())
            .finish()
    }
}

/// A registered native handle owned by one resource wrapper.
///
/// Dropping it releases the handle if the owner has not already done so.
pub(crate) struct OwnedHandle {
    ndi: Ndi,
    slot: Arc<HandleSlot>,
}

impl OwnedHandle {
    /// Runs `create` on a worker and registers the handle it returns.
    ///
    /// Registration happens on the worker, so a caller that gives up waiting
    /// never leaks the native instance. `destroy` runs exactly once when the
    /// handle is released; it owns anything the native instance borrows.
    pub(crate) async fn create<C, D>(
        ndi: &Ndi,
        kind: HandleKind,
        call: &'static str,
        create: C,
        destroy: D,
    ) -> Result<Self>
    where
        C: FnOnce(&dyn NdiApi) -> Result<RawHandle> + Send + 'static,
        D: FnOnce(&dyn NdiApi, RawHandle) + Send + 'static,
    {
        let creating = Arc::clone(&ndi.inner.creations).read_owned().await;
        ndi.inner.ensure_initialized(kind)?;
        let context = Arc::clone(&ndi.inner);
        let slot = ndi
            .inner
            .bridge
            .run(call, move || {
                let _creating = creating;
                let raw = create(context.api.as_ref())?;
                if raw.0.is_null() {
                    return Err(Error::CreationError {
                        kind,
                        message: format!("{call} returned no instance"),
                    });
                }
                let api = Arc::clone(&context.api);
                Ok(context
                    .registry
                    .register(kind, raw, move |raw| destroy(api.as_ref(), raw)))
            })
            .await?;
        Ok(Self {
            ndi: ndi.clone(),
            slot,
        })
    }

    /// Runs a native call on this handle through its FIFO lane.
    pub(crate) async fn call<T, F>(&self, call: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&dyn NdiApi, RawHandle) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let context = Arc::clone(&self.ndi.inner);
        let slot = Arc::clone(&self.slot);
        self.ndi
            .inner
            .bridge
            .run_on(call, &self.slot, move |raw| {
                let result = f(context.api.as_ref(), raw);
                if slot.take_release_request() {
                    let _ = context.registry.release(&slot);
                }
                result
            })
            .await
    }

    /// Releases the handle after any queued calls. A second release fails
    /// with [`Error::UseAfterFree`].
    pub(crate) async fn release(&self) -> Result<()> {
        let _lane = self.slot.lane().lock_owned().await;
        self.ndi.inner.registry.release(&self.slot)
    }

    pub(crate) fn ndi(&self) -> &Ndi {
        &self.ndi
    }

    pub(crate) fn slot(&self) -> &Arc<HandleSlot> {
        &self.slot
    }

    pub(crate) fn state(&self) -> ResourceState {
        self.slot.state()
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if self.slot.state() == ResourceState::Released {
            return;
        }
        match self.slot.lane().try_lock_owned() {
            Ok(_lane) => {
                if let Err(err) = self.ndi.inner.registry.release(&self.slot) {
                    tracing::debug!(%err, "handle already released when its owner dropped");
                }
            }
            // A detached call is still running on the handle.
            Err(_) => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let ndi = self.ndi.clone();
                    let slot = Arc::clone(&self.slot);
                    runtime.spawn(async move {
                        let _lane = slot.lane().lock_owned().await;
                        let _ = ndi.inner.registry.release(&slot);
                    });
                }
                Err(_) => self.slot.request_release(),
            },
        }
    }
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.slot.fmt(f)
    }
}
