//! NDI routing: a virtual source that forwards another source.
//!
//! A routing instance appears on the network under its own name. Receivers
//! connected to it are redirected to whatever source it currently points at,
//! without the routing host relaying any media itself.

use std::{ffi::CString, ptr};

use serde_json::Value;

use crate::{
    finder::Source,
    ndi_lib::*,
    options::{self, LIST_DELIMITER},
    registry::{HandleKind, RawHandle, ResourceState},
    runtime::OwnedHandle,
    Error, Ndi, Result,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingOptions {
    /// The name the routed output is announced under; `None` lets the SDK
    /// pick one.
    pub name: Option<String>,
    /// Comma-separated groups; `None` for the SDK default.
    pub groups: Option<String>,
}

impl RoutingOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            groups: None,
        }
    }

    /// Sets the groups, in order.
    pub fn with_groups<I, S>(mut self, groups: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.groups = options::join_list("groups", groups, LIST_DELIMITER)?;
        Ok(self)
    }

    /// Reads `{ name, groups }` from a host option bag.
    pub fn from_value(raw: &Value) -> Result<Self> {
        let options = options::normalize(Some(raw), &options::ROUTING_SCHEMA)?;
        Ok(Self {
            name: options.text("name").map(str::to_owned),
            groups: options.text("groups").map(str::to_owned),
        })
    }
}

/// A routed NDI output.
///
/// # Examples
///
/// ```no_run
/// # use ndi_bridge::{Ndi, RoutingOptions, Source};
/// # async fn run() -> Result<(), ndi_bridge::Error> {
/// let ndi = Ndi::new()?;
/// let routing = ndi.routing(&RoutingOptions::new("Program Out")).await?;
///
/// routing.change(&Source::new("STUDIO (Camera 2)")).await?;
/// println!("{} receivers follow {}", routing.connections(0).await?, routing.source_name().await?);
/// routing.clear().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Routing {
    handle: OwnedHandle,
    options: RoutingOptions,
}

impl Routing {
    pub async fn new(ndi: &Ndi, options: &RoutingOptions) -> Result<Self> {
        let name = options.name.as_deref().map(CString::new).transpose()?;
        let groups = options.groups.as_deref().map(CString::new).transpose()?;
        let handle = OwnedHandle::create(
            ndi,
            HandleKind::Routing,
            "NDIlib_routing_create",
            move |api| {
                let raw = NDIlib_routing_create_t {
                    p_ndi_name: name.as_ref().map_or(ptr::null(), |n| n.as_ptr()),
                    p_groups: groups.as_ref().map_or(ptr::null(), |g| g.as_ptr()),
                };
                // SAFETY: the strings outlive the call.
                Ok(RawHandle(unsafe { api.routing_create(&raw) }))
            },
            |api, raw| {
                // SAFETY: released exactly once.
                unsafe { api.routing_destroy(raw.0) }
            },
        )
        .await?;
        tracing::debug!(name = ?options.name, "routing created");
        Ok(Self {
            handle,
            options: options.clone(),
        })
    }

    pub async fn from_value(ndi: &Ndi, raw: &Value) -> Result<Self> {
        Self::new(ndi, &RoutingOptions::from_value(raw)?).await
    }

    /// Points the output at `source`. Returns the SDK's success flag.
    pub async fn change(&self, source: &Source) -> Result<bool> {
        // Fail on NUL bytes here, before anything is queued.
        source.to_raw()?;
        let source = source.clone();
        self.handle
            .call("NDIlib_routing_change", move |api, raw| {
                let target = source.to_raw()?;
                // SAFETY: live instance; the strings outlive the call.
                Ok(unsafe { api.routing_change(raw.0, &target.raw) })
            })
            .await
    }

    /// Stops forwarding; connected receivers see no source.
    pub async fn clear(&self) -> Result<bool> {
        self.handle
            .call("NDIlib_routing_clear", |api, raw| {
                // SAFETY: live instance, serialized by the handle lane.
                Ok(unsafe { api.routing_clear(raw.0) })
            })
            .await
    }

    /// Number of receivers connected, waiting up to `timeout_ms` for at least
    /// one (0 polls).
    pub async fn connections(&self, timeout_ms: u32) -> Result<i32> {
        self.handle
            .call("NDIlib_routing_get_no_connections", move |api, raw| {
                // SAFETY: live instance, serialized by the handle lane.
                Ok(unsafe { api.routing_get_no_connections(raw.0, timeout_ms) })
            })
            .await
    }

    /// The name this output is announced under, as the SDK reports it.
    pub async fn source_name(&self) -> Result<String> {
        self.handle
            .call("NDIlib_routing_get_source_name", |api, raw| {
                // SAFETY: live instance; the descriptor belongs to the instance
                // and is copied before the lane is released.
                let source = unsafe { api.routing_get_source_name(raw.0) };
                if source.is_null() {
                    return Err(Error::native(
                        "NDIlib_routing_get_source_name",
                        "returned no source",
                    ));
                }
                // SAFETY: checked non-null; the strings stay valid while the
                // lane is held.
                Ok(unsafe { Source::from_raw(&*source) }.name)
            })
            .await
    }

    /// The configured name, if one was given.
    pub fn name(&self) -> Option<&str> {
        self.options.name.as_deref()
    }

    pub fn options(&self) -> &RoutingOptions {
        &self.options
    }

    /// Destroys the routed output. A second release fails with
    /// [`Error::UseAfterFree`].
    pub async fn release(&self) -> Result<()> {
        self.handle.release().await
    }

    pub fn state(&self) -> ResourceState {
        self.handle.state()
    }
}
