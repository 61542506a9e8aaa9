//! The native function table and the runtime loader for the NDI library.
//!
//! [`NdiApi`] is the seam between the binding and the vendor SDK: one method
//! per native entry point, taking and returning the raw structures from
//! [`crate::ndi_lib`]. [`LoadedSdk`] implements it over a dynamically loaded
//! `libndi`, and tests implement it with a recording mock.

use std::env;
use std::ffi::{c_char, c_int};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

use libloading::Library;
use once_cell::sync::OnceCell;

use crate::ndi_lib::*;
use crate::{Error, Result};

#[cfg(all(target_arch = "x86_64", target_os = "windows"))]
pub const LIBRARY_NAMES: &[&str] = &["Processing.NDI.Lib.x64.dll"];
#[cfg(all(target_arch = "x86", target_os = "windows"))]
pub const LIBRARY_NAMES: &[&str] = &["Processing.NDI.Lib.x86.dll"];
#[cfg(target_os = "linux")]
pub const LIBRARY_NAMES: &[&str] = &["libndi.so.6", "libndi.so.5"];
#[cfg(target_os = "macos")]
pub const LIBRARY_NAMES: &[&str] = &["libndi.dylib"];
#[cfg(all(unix, not(any(target_os = "linux", target_os = "macos"))))]
pub const LIBRARY_NAMES: &[&str] = &["libndi.so"];
// No native runtime ships for these targets; a configured path still works.
#[cfg(all(windows, not(any(target_arch = "x86", target_arch = "x86_64"))))]
pub const LIBRARY_NAMES: &[&str] = &["Processing.NDI.Lib.x64.dll"];
#[cfg(not(any(unix, windows)))]
pub const LIBRARY_NAMES: &[&str] = &[];

/// Environment variables naming the runtime directory, newest SDK first.
pub const RUNTIME_DIR_VARS: &[&str] = &["NDI_RUNTIME_DIR_V6", "NDI_RUNTIME_DIR_V5"];

/// The subset of the NDI C API used by this crate.
///
/// # Safety
///
/// Every method forwards to (or stands in for) the C function of the same
/// name. Callers must uphold the SDK's contract for that function: instance
/// handles must be live and not used concurrently, and pointer arguments must
/// be valid for the duration of the call. Implementations must be safe to
/// call from any thread.
#[allow(clippy::missing_safety_doc)]
pub trait NdiApi: Send + Sync {
    unsafe fn initialize(&self) -> bool;
    unsafe fn destroy(&self);
    unsafe fn is_supported_cpu(&self) -> bool;
    unsafe fn version(&self) -> *const c_char;

    /// `None` takes the SDK's no-argument discovery path (NULL settings).
    unsafe fn find_create_v2(
        &self,
        settings: Option<&NDIlib_find_create_t>,
    ) -> NDIlib_find_instance_t;
    unsafe fn find_destroy(&self, instance: NDIlib_find_instance_t);
    unsafe fn find_wait_for_sources(&self, instance: NDIlib_find_instance_t, timeout_ms: u32)
        -> bool;
    unsafe fn find_get_current_sources(
        &self,
        instance: NDIlib_find_instance_t,
        no_sources: &mut u32,
    ) -> *const NDIlib_source_t;

    unsafe fn recv_create_v3(&self, settings: &NDIlib_recv_create_v3_t) -> NDIlib_recv_instance_t;
    unsafe fn recv_destroy(&self, instance: NDIlib_recv_instance_t);
    unsafe fn recv_capture_v3(
        &self,
        instance: NDIlib_recv_instance_t,
        video: *mut NDIlib_video_frame_v2_t,
        audio: *mut NDIlib_audio_frame_v3_t,
        metadata: *mut NDIlib_metadata_frame_t,
        timeout_ms: u32,
    ) -> NDIlib_frame_type_e;
    unsafe fn recv_free_video_v2(
        &self,
        instance: NDIlib_recv_instance_t,
        frame: &NDIlib_video_frame_v2_t,
    );
    unsafe fn recv_free_audio_v3(
        &self,
        instance: NDIlib_recv_instance_t,
        frame: &NDIlib_audio_frame_v3_t,
    );
    unsafe fn recv_free_metadata(
        &self,
        instance: NDIlib_recv_instance_t,
        frame: &NDIlib_metadata_frame_t,
    );

    unsafe fn send_create(&self, settings: &NDIlib_send_create_t) -> NDIlib_send_instance_t;
    unsafe fn send_destroy(&self, instance: NDIlib_send_instance_t);
    unsafe fn send_send_video_v2(
        &self,
        instance: NDIlib_send_instance_t,
        frame: &NDIlib_video_frame_v2_t,
    );
    unsafe fn send_send_audio_v3(
        &self,
        instance: NDIlib_send_instance_t,
        frame: &NDIlib_audio_frame_v3_t,
    );
    unsafe fn util_send_send_audio_interleaved_32f(
        &self,
        instance: NDIlib_send_instance_t,
        frame: &NDIlib_audio_frame_interleaved_32f_t,
    );
    unsafe fn util_send_send_audio_interleaved_16s(
        &self,
        instance: NDIlib_send_instance_t,
        frame: &NDIlib_audio_frame_interleaved_16s_t,
    );
    unsafe fn send_send_metadata(
        &self,
        instance: NDIlib_send_instance_t,
        frame: &NDIlib_metadata_frame_t,
    );
    unsafe fn send_get_no_connections(&self, instance: NDIlib_send_instance_t, timeout_ms: u32)
        -> c_int;

    unsafe fn routing_create(&self, settings: &NDIlib_routing_create_t)
        -> NDIlib_routing_instance_t;
    unsafe fn routing_destroy(&self, instance: NDIlib_routing_instance_t);
    unsafe fn routing_change(
        &self,
        instance: NDIlib_routing_instance_t,
        source: &NDIlib_source_t,
    ) -> bool;
    unsafe fn routing_clear(&self, instance: NDIlib_routing_instance_t) -> bool;
    unsafe fn routing_get_no_connections(
        &self,
        instance: NDIlib_routing_instance_t,
        timeout_ms: u32,
    ) -> c_int;
    unsafe fn routing_get_source_name(
        &self,
        instance: NDIlib_routing_instance_t,
    ) -> *const NDIlib_source_t;
}

#[allow(clippy::type_complexity)]
struct Symbols {
    initialize: unsafe extern "C" fn() -> bool,
    destroy: unsafe extern "C" fn(),
    is_supported_cpu: unsafe extern "C" fn() -> bool,
    version: unsafe extern "C" fn() -> *const c_char,
    find_create_v2: unsafe extern "C" fn(*const NDIlib_find_create_t) -> NDIlib_find_instance_t,
    find_destroy: unsafe extern "C" fn(NDIlib_find_instance_t),
    find_wait_for_sources: unsafe extern "C" fn(NDIlib_find_instance_t, u32) -> bool,
    find_get_current_sources:
        unsafe extern "C" fn(NDIlib_find_instance_t, *mut u32) -> *const NDIlib_source_t,
    recv_create_v3: unsafe extern "C" fn(*const NDIlib_recv_create_v3_t) -> NDIlib_recv_instance_t,
    recv_destroy: unsafe extern "C" fn(NDIlib_recv_instance_t),
    recv_capture_v3: unsafe extern "C" fn(
        NDIlib_recv_instance_t,
        *mut NDIlib_video_frame_v2_t,
        *mut NDIlib_audio_frame_v3_t,
        *mut NDIlib_metadata_frame_t,
        u32,
    ) -> NDIlib_frame_type_e,
    recv_free_video_v2: unsafe extern "C" fn(NDIlib_recv_instance_t, *const NDIlib_video_frame_v2_t),
    recv_free_audio_v3: unsafe extern "C" fn(NDIlib_recv_instance_t, *const NDIlib_audio_frame_v3_t),
    recv_free_metadata: unsafe extern "C" fn(NDIlib_recv_instance_t, *const NDIlib_metadata_frame_t),
    send_create: unsafe extern "C" fn(*const NDIlib_send_create_t) -> NDIlib_send_instance_t,
    send_destroy: unsafe extern "C" fn(NDIlib_send_instance_t),
    send_send_video_v2: unsafe extern "C" fn(NDIlib_send_instance_t, *const NDIlib_video_frame_v2_t),
    send_send_audio_v3: unsafe extern "C" fn(NDIlib_send_instance_t, *const NDIlib_audio_frame_v3_t),
    util_send_send_audio_interleaved_32f:
        unsafe extern "C" fn(NDIlib_send_instance_t, *const NDIlib_audio_frame_interleaved_32f_t),
    util_send_send_audio_interleaved_16s:
        unsafe extern "C" fn(NDIlib_send_instance_t, *const NDIlib_audio_frame_interleaved_16s_t),
    send_send_metadata: unsafe extern "C" fn(NDIlib_send_instance_t, *const NDIlib_metadata_frame_t),
    send_get_no_connections: unsafe extern "C" fn(NDIlib_send_instance_t, u32) -> c_int,
    routing_create: unsafe extern "C" fn(*const NDIlib_routing_create_t) -> NDIlib_routing_instance_t,
    routing_destroy: unsafe extern "C" fn(NDIlib_routing_instance_t),
    routing_change: unsafe extern "C" fn(NDIlib_routing_instance_t, *const NDIlib_source_t) -> bool,
    routing_clear: unsafe extern "C" fn(NDIlib_routing_instance_t) -> bool,
    routing_get_no_connections: unsafe extern "C" fn(NDIlib_routing_instance_t, u32) -> c_int,
    routing_get_source_name:
        unsafe extern "C" fn(NDIlib_routing_instance_t) -> *const NDIlib_source_t,
}

/// The NDI runtime library, loaded from disk.
pub struct LoadedSdk {
    symbols: Symbols,
    path: PathBuf,
    // Declared last so the function pointers above never outlive it.
    _library: Library,
}

impl LoadedSdk {
    /// Loads the runtime from `path`, which may be a directory holding one of
    /// the platform's [`LIBRARY_NAMES`] or the library file itself.
    pub fn open(path: &Path) -> Result<Self> {
        let candidates: Vec<PathBuf> = if path.is_dir() {
            LIBRARY_NAMES.iter().map(|name| path.join(name)).collect()
        } else {
            vec![path.to_path_buf()]
        };
        Self::open_first(&candidates)
    }

    /// Searches the runtime directories named by [`RUNTIME_DIR_VARS`], then the
    /// system loader path.
    pub fn discover() -> Result<Self> {
        let mut candidates = Vec::new();
        for var in RUNTIME_DIR_VARS {
            if let Some(dir) = env::var_os(var) {
                let dir = PathBuf::from(dir);
                candidates.extend(LIBRARY_NAMES.iter().map(|name| dir.join(name)));
            }
        }
        candidates.extend(LIBRARY_NAMES.iter().map(PathBuf::from));
        Self::open_first(&candidates)
    }

    /// The file the runtime was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_first(candidates: &[PathBuf]) -> Result<Self> {
        let mut failures = Vec::new();
        for candidate in candidates {
            // SAFETY: loading the NDI runtime runs its initializers, which have
            // no preconditions on our side.
            match unsafe { Library::new(candidate) } {
                Ok(library) => {
                    tracing::info!(path = %candidate.display(), "loaded NDI runtime");
                    return Self::bind(library, candidate.clone());
                }
                Err(err) => {
                    tracing::debug!(path = %candidate.display(), %err, "NDI runtime not found");
                    failures.push(format!("{}: {err}", candidate.display()));
                }
            }
        }
        Err(Error::InitializationFailed(format!(
            "could not load the NDI runtime ({})",
            failures.join("; ")
        )))
    }

    fn bind(library: Library, path: PathBuf) -> Result<Self> {
        macro_rules! load_symbol {
            ($name:ident) => {{
                // SAFETY: the declared signature matches Processing.NDI.Lib.h.
                let symbol = unsafe { library.get(concat!(stringify!($name), "\0").as_bytes()) }
                    .map_err(|err| {
                        Error::InitializationFailed(format!(
                            concat!("failed to load function '", stringify!($name), "': {}"),
                            err
                        ))
                    })?;
                *symbol
            }};
        }

        let symbols = Symbols {
            initialize: load_symbol!(NDIlib_initialize),
            destroy: load_symbol!(NDIlib_destroy),
            is_supported_cpu: load_symbol!(NDIlib_is_supported_CPU),
            version: load_symbol!(NDIlib_version),
            find_create_v2: load_symbol!(NDIlib_find_create_v2),
            find_destroy: load_symbol!(NDIlib_find_destroy),
            find_wait_for_sources: load_symbol!(NDIlib_find_wait_for_sources),
            find_get_current_sources: load_symbol!(NDIlib_find_get_current_sources),
            recv_create_v3: load_symbol!(NDIlib_recv_create_v3),
            recv_destroy: load_symbol!(NDIlib_recv_destroy),
            recv_capture_v3: load_symbol!(NDIlib_recv_capture_v3),
            recv_free_video_v2: load_symbol!(NDIlib_recv_free_video_v2),
            recv_free_audio_v3: load_symbol!(NDIlib_recv_free_audio_v3),
            recv_free_metadata: load_symbol!(NDIlib_recv_free_metadata),
            send_create: load_symbol!(NDIlib_send_create),
            send_destroy: load_symbol!(NDIlib_send_destroy),
            send_send_video_v2: load_symbol!(NDIlib_send_send_video_v2),
            send_send_audio_v3: load_symbol!(NDIlib_send_send_audio_v3),
            util_send_send_audio_interleaved_32f: load_symbol!(
                NDIlib_util_send_send_audio_interleaved_32f
            ),
            util_send_send_audio_interleaved_16s: load_symbol!(
                NDIlib_util_send_send_audio_interleaved_16s
            ),
            send_send_metadata: load_symbol!(NDIlib_send_send_metadata),
            send_get_no_connections: load_symbol!(NDIlib_send_get_no_connections),
            routing_create: load_symbol!(NDIlib_routing_create),
            routing_destroy: load_symbol!(NDIlib_routing_destroy),
            routing_change: load_symbol!(NDIlib_routing_change),
            routing_clear: load_symbol!(NDIlib_routing_clear),
            routing_get_no_connections: load_symbol!(NDIlib_routing_get_no_connections),
            routing_get_source_name: load_symbol!(NDIlib_routing_get_source_name),
        };

        Ok(Self {
            symbols,
            path,
            _library: library,
        })
    }
}

/// Returns the process-wide runtime, loading it on first use.
///
/// An explicit `path` is only honoured by the call that performs the load.
pub(crate) fn shared(path: Option<&Path>) -> Result<Arc<dyn NdiApi>> {
    static SHARED: OnceCell<Arc<LoadedSdk>> = OnceCell::new();

    let sdk = SHARED.get_or_try_init(|| {
        match path {
            Some(path) => LoadedSdk::open(path),
            None => LoadedSdk::discover(),
        }
        .map(Arc::new)
    })?;
    let sdk: Arc<dyn NdiApi> = sdk.clone();
    Ok(sdk)
}

impl NdiApi for LoadedSdk {
    unsafe fn initialize(&self) -> bool {
        (self.symbols.initialize)()
    }

    unsafe fn destroy(&self) {
        (self.symbols.destroy)()
    }

    unsafe fn is_supported_cpu(&self) -> bool {
        (self.symbols.is_supported_cpu)()
    }

    unsafe fn version(&self) -> *const c_char {
        (self.symbols.version)()
    }

    unsafe fn find_create_v2(
        &self,
        settings: Option<&NDIlib_find_create_t>,
    ) -> NDIlib_find_instance_t {
        let settings = settings.map_or(ptr::null(), |s| s as *const _);
        (self.symbols.find_create_v2)(settings)
    }

    unsafe fn find_destroy(&self, instance: NDIlib_find_instance_t) {
        (self.symbols.find_destroy)(instance)
    }

    unsafe fn find_wait_for_sources(
        &self,
        instance: NDIlib_find_instance_t,
        timeout_ms: u32,
    ) -> bool {
        (self.symbols.find_wait_for_sources)(instance, timeout_ms)
    }

    unsafe fn find_get_current_sources(
        &self,
        instance: NDIlib_find_instance_t,
        no_sources: &mut u32,
    ) -> *const NDIlib_source_t {
        (self.symbols.find_get_current_sources)(instance, no_sources)
    }

    unsafe fn recv_create_v3(&self, settings: &NDIlib_recv_create_v3_t) -> NDIlib_recv_instance_t {
        (self.symbols.recv_create_v3)(settings)
    }

    unsafe fn recv_destroy(&self, instance: NDIlib_recv_instance_t) {
        (self.symbols.recv_destroy)(instance)
    }

    unsafe fn recv_capture_v3(
        &self,
        instance: NDIlib_recv_instance_t,
        video: *mut NDIlib_video_frame_v2_t,
        audio: *mut NDIlib_audio_frame_v3_t,
        metadata: *mut NDIlib_metadata_frame_t,
        timeout_ms: u32,
    ) -> NDIlib_frame_type_e {
        (self.symbols.recv_capture_v3)(instance, video, audio, metadata, timeout_ms)
    }

    unsafe fn recv_free_video_v2(
        &self,
        instance: NDIlib_recv_instance_t,
        frame: &NDIlib_video_frame_v2_t,
    ) {
        (self.symbols.recv_free_video_v2)(instance, frame)
    }

    unsafe fn recv_free_audio_v3(
        &self,
        instance: NDIlib_recv_instance_t,
        frame: &NDIlib_audio_frame_v3_t,
    ) {
        (self.symbols.recv_free_audio_v3)(instance, frame)
    }

    unsafe fn recv_free_metadata(
        &self,
        instance: NDIlib_recv_instance_t,
        frame: &NDIlib_metadata_frame_t,
    ) {
        (self.symbols.recv_free_metadata)(instance, frame)
    }

    unsafe fn send_create(&self, settings: &NDIlib_send_create_t) -> NDIlib_send_instance_t {
        (self.symbols.send_create)(settings)
    }

    unsafe fn send_destroy(&self, instance: NDIlib_send_instance_t) {
        (self.symbols.send_destroy)(instance)
    }

    unsafe fn send_send_video_v2(
        &self,
        instance: NDIlib_send_instance_t,
        frame: &NDIlib_video_frame_v2_t,
    ) {
        (self.symbols.send_send_video_v2)(instance, frame)
    }

    unsafe fn send_send_audio_v3(
        &self,
        instance: NDIlib_send_instance_t,
        frame: &NDIlib_audio_frame_v3_t,
    ) {
        (self.symbols.send_send_audio_v3)(instance, frame)
    }

    unsafe fn util_send_send_audio_interleaved_32f(
        &self,
        instance: NDIlib_send_instance_t,
        frame: &NDIlib_audio_frame_interleaved_32f_t,
    ) {
        (self.symbols.util_send_send_audio_interleaved_32f)(instance, frame)
    }

    unsafe fn util_send_send_audio_interleaved_16s(
        &self,
        instance: NDIlib_send_instance_t,
        frame: &NDIlib_audio_frame_interleaved_16s_t,
    ) {
        (self.symbols.util_send_send_audio_interleaved_16s)(instance, frame)
    }

    unsafe fn send_send_metadata(
        &self,
        instance: NDIlib_send_instance_t,
        frame: &NDIlib_metadata_frame_t,
    ) {
        (self.symbols.send_send_metadata)(instance, frame)
    }

    unsafe fn send_get_no_connections(
        &self,
        instance: NDIlib_send_instance_t,
        timeout_ms: u32,
    ) -> c_int {
        (self.symbols.send_get_no_connections)(instance, timeout_ms)
    }

    unsafe fn routing_create(
        &self,
        settings: &NDIlib_routing_create_t,
    ) -> NDIlib_routing_instance_t {
        (self.symbols.routing_create)(settings)
    }

    unsafe fn routing_destroy(&self, instance: NDIlib_routing_instance_t) {
        (self.symbols.routing_destroy)(instance)
    }

    unsafe fn routing_change(
        &self,
        instance: NDIlib_routing_instance_t,
        source: &NDIlib_source_t,
    ) -> bool {
        (self.symbols.routing_change)(instance, source)
    }

    unsafe fn routing_clear(&self, instance: NDIlib_routing_instance_t) -> bool {
        (self.symbols.routing_clear)(instance)
    }

    unsafe fn routing_get_no_connections(
        &self,
        instance: NDIlib_routing_instance_t,
        timeout_ms: u32,
    ) -> c_int {
        (self.symbols.routing_get_no_connections)(instance, timeout_ms)
    }

    unsafe fn routing_get_source_name(
        &self,
        instance: NDIlib_routing_instance_t,
    ) -> *const NDIlib_source_t {
        (self.symbols.routing_get_source_name)(instance)
    }
}
