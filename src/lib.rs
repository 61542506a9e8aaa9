//! Async, memory-safe boundary to the NDI® SDK (Network Device Interface).
//!
//! This crate sits between a host application and the vendor NDI runtime. It
//! loads the runtime at startup, owns every native handle the host creates,
//! and moves frames across the boundary without copying pixel or sample data.
//!
//! # Quick Start
//!
//! ```no_run
//! use ndi_bridge::{Ndi, FinderOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), ndi_bridge::Error> {
//! // Load and initialize the NDI runtime
//! let ndi = Ndi::new()?;
//!
//! // Find sources on the network
//! let options = FinderOptions::builder().groups(["Public"]).build()?;
//! let sources = ndi.find(Some(&options), Some(5000)).await?;
//!
//! for source in sources {
//!     println!("Found: {}", source);
//! }
//! ndi.destroy().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Core Concepts
//!
//! ## Runtime Management
//!
//! The [`Ndi`] context owns the loaded runtime, the registry of live native
//! handles, and the worker pool for blocking calls. [`Ndi::destroy`] releases
//! every outstanding handle, newest first, before shutting the runtime down.
//!
//! ## Blocking calls
//!
//! Discovery waits, captures and sends block inside the SDK. They run on
//! tokio's blocking pool, never on the calling task. Calls on one handle run
//! one at a time in the order they were made; calls on different handles run
//! in parallel. A timeout is not an error: a capture that times out resolves
//! to `Ok(None)`.
//!
//! ## Frames
//!
//! Outgoing frames are validated against their declared layout before any
//! native call ([`Error::BufferSizeMismatch`]). Received frames are zero-copy
//! views ([`VideoFrameRef`], [`AudioFrameRef`], [`MetadataFrameRef`]) that
//! hand the buffer back to the SDK when dropped.
//!
//! ## Host option bags
//!
//! Every resource also accepts a loosely typed `serde_json::Value` option
//! bag, validated once by the [`options`] module.
//!
//! # Platform Support
//!
//! - **Windows**: `Processing.NDI.Lib.x64.dll` / `Processing.NDI.Lib.x86.dll`
//! - **Linux**: `libndi.so.6`, `libndi.so.5`
//! - **macOS**: `libndi.dylib`
//!
//! The runtime directory can be given through `NDI_RUNTIME_DIR_V6`,
//! `NDI_RUNTIME_DIR_V5`, or [`BridgeConfig::library_path`].

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(clippy::wildcard_imports)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

// Internal modules
mod bridge;
mod capture;
mod error;
mod registry;

// Public modules
pub mod config;
pub mod finder;
pub mod frames;
pub mod ndi_lib;
pub mod options;
pub mod receiver;
pub mod routing;
pub mod runtime;
pub mod sdk;
pub mod sender;

// Re-exports
pub use {
    config::BridgeConfig,
    error::*,
    finder::{Finder, FinderOptions, FinderOptionsBuilder, Source},
    frames::{
        AudioData, AudioFormat, AudioFrame, AudioFrameBuilder, AudioFrameRef, Frame,
        MetadataFrame, MetadataFrameRef, PixelFormat, ScanType, SendFrame, VideoFrame,
        VideoFrameBuilder, VideoFrameRef,
    },
    receiver::{Bandwidth, ColorFormat, Receiver, ReceiverOptions, ReceiverOptionsBuilder},
    registry::{HandleKind, ResourceState},
    routing::{Routing, RoutingOptions},
    runtime::Ndi,
    sdk::{LoadedSdk, NdiApi},
    sender::{Sender, SenderOptions, SenderOptionsBuilder},
};

/// Alias for Result with our Error type
pub type Result<T> = std::result::Result<T, crate::error::Error>;

// Tests
#[cfg(test)]
#[path = "tests.rs"]
mod tests;
