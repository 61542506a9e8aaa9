//! Error types for the ndi-bridge library.

use std::ffi::NulError;
use thiserror::Error;

use crate::registry::HandleKind;

/// The main error type for NDI boundary operations.
///
/// `InvalidOption` and `BufferSizeMismatch` are always raised before any
/// native call is made. A capture or discovery wait that times out is not an
/// error: it resolves to `Ok(None)` or `Ok(false)`.
#[derive(Debug, Error)]
pub enum Error {
    /// The NDI runtime library could not be loaded or initialized.
    ///
    /// This typically occurs when the NDI runtime is not installed or a
    /// required symbol is missing from the installed version.
    #[error("Failed to initialize the NDI runtime: {0}")]
    InitializationFailed(String),

    /// The native layer refused to allocate a resource.
    #[error("Failed to create NDI {kind} instance: {message}")]
    CreationError { kind: HandleKind, message: String },

    /// A configuration value failed schema validation.
    #[error("Invalid option `{key}`: {message}")]
    InvalidOption { key: String, message: String },

    /// A send-direction buffer is too short for its declared layout.
    #[error("Buffer size mismatch: layout requires {required} bytes, buffer holds {actual}")]
    BufferSizeMismatch { required: usize, actual: usize },

    /// An operation was attempted on a handle that has already been released.
    #[error("Use after free: NDI {kind} handle {id} has already been released")]
    UseAfterFree { kind: HandleKind, id: u64 },

    /// The native SDK reported a failure.
    #[error("NDI call `{call}` failed: {message}")]
    NativeCallError { call: &'static str, message: String },

    /// Frame data handed over by the SDK or the caller is inconsistent.
    #[error("Invalid frame data: {0}")]
    InvalidFrame(String),

    /// Invalid UTF-8 data in a string from the NDI SDK.
    #[error("Invalid UTF-8 string in data: {0}")]
    InvalidUtf8(String),

    /// Failed to create a C string due to interior null bytes.
    #[error("Invalid CString: {0}")]
    InvalidCString(#[from] NulError),

    /// A background worker panicked or was cancelled while running a native call.
    #[error("Worker failed while running `{call}`: {message}")]
    WorkerFailed { call: &'static str, message: String },
}

impl Error {
    pub(crate) fn invalid_option(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidOption {
            key: key.into(),
            message: message.into(),
        }
    }

    pub(crate) fn native(call: &'static str, message: impl Into<String>) -> Self {
        Error::NativeCallError {
            call,
            message: message.into(),
        }
    }
}
