//! NDI source discovery and network browsing.

use std::{
    ffi::{CStr, CString},
    fmt::{self, Display, Formatter},
    ptr,
    sync::Arc,
};

use serde_json::Value;

use crate::{
    ndi_lib::*,
    options::{self, LIST_DELIMITER},
    registry::{HandleKind, RawHandle, ResourceState},
    runtime::OwnedHandle,
    Ndi, Result,
};

/// Configuration for NDI source discovery.
///
/// Use the builder pattern to create instances with specific settings.
///
/// # Examples
///
/// ```
/// use ndi_bridge::FinderOptions;
///
/// // Find all sources including local ones
/// let options = FinderOptions::builder()
///     .show_local_sources(true)
///     .build()?;
///
/// // Find sources in specific groups
/// let options = FinderOptions::builder()
///     .groups(["Public", "Studio"])
///     .build()?;
/// assert_eq!(options.groups.as_deref(), Some("Public,Studio"));
///
/// // Find sources on specific network segments
/// let options = FinderOptions::builder()
///     .extra_ips(["192.168.1.20", "10.0.0.7"])
///     .build()?;
/// # Ok::<(), ndi_bridge::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinderOptions {
    /// Whether to include local sources in discovery.
    pub show_local_sources: bool,
    /// Comma-separated list of groups to search (e.g., "Public,Private").
    pub groups: Option<String>,
    /// Comma-separated additional IP addresses to query directly.
    pub extra_ips: Option<String>,
}

impl Default for FinderOptions {
    fn default() -> Self {
        Self {
            show_local_sources: true,
            groups: None,
            extra_ips: None,
        }
    }
}

impl FinderOptions {
    /// Create a builder for configuring find options
    pub fn builder() -> FinderOptionsBuilder {
        FinderOptionsBuilder::new()
    }

    /// Reads `{ showLocalSources, groups, extraIPs }` from a host option bag.
    pub fn from_value(raw: &Value) -> Result<Self> {
        let options = options::normalize(Some(raw), &options::FIND_SCHEMA)?;
        Ok(Self {
            show_local_sources: options.bool("showLocalSources").unwrap_or(true),
            groups: options.text("groups").map(str::to_owned),
            extra_ips: options.text("extraIPs").map(str::to_owned),
        })
    }
}

/// Builder for configuring FinderOptions with ergonomic method chaining
#[derive(Debug, Clone, Default)]
pub struct FinderOptionsBuilder {
    show_local_sources: Option<bool>,
    groups: Vec<String>,
    extra_ips: Vec<String>,
}

impl FinderOptionsBuilder {
    /// Creates a new builder with default settings.
    ///
    /// Default settings:
    /// - `show_local_sources`: `true`
    /// - `groups`: none (the SDK's default groups)
    /// - `extra_ips`: none
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure whether to show local sources
    #[must_use]
    pub fn show_local_sources(mut self, show: bool) -> Self {
        self.show_local_sources = Some(show);
        self
    }

    /// Set the groups to search, in order.
    #[must_use]
    pub fn groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    /// Set extra IPs to search, in order.
    #[must_use]
    pub fn extra_ips<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_ips = ips.into_iter().map(Into::into).collect();
        self
    }

    /// Build the FinderOptions
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidOption`] if a group or address contains
    /// the list delimiter or a NUL byte.
    pub fn build(self) -> Result<FinderOptions> {
        Ok(FinderOptions {
            show_local_sources: self.show_local_sources.unwrap_or(true),
            groups: options::join_list("groups", &self.groups, LIST_DELIMITER)?,
            extra_ips: options::join_list("extraIPs", &self.extra_ips, LIST_DELIMITER)?,
        })
    }
}

// C strings handed to NDIlib_find_create_v2, kept alive with the instance.
struct FindSettings {
    show_local_sources: bool,
    groups: Option<CString>,
    extra_ips: Option<CString>,
}

impl FindSettings {
    fn new(options: &FinderOptions) -> Result<Self> {
        Ok(Self {
            show_local_sources: options.show_local_sources,
            groups: options.groups.as_deref().map(CString::new).transpose()?,
            extra_ips: options.extra_ips.as_deref().map(CString::new).transpose()?,
        })
    }

    fn to_raw(&self) -> NDIlib_find_create_t {
        NDIlib_find_create_t {
            show_local_sources: self.show_local_sources,
            p_groups: self.groups.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
            p_extra_ips: self.extra_ips.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
        }
    }
}

/// Discovers NDI sources on the network.
///
/// The SDK keeps discovering in the background for as long as the finder is
/// alive; [`Finder::sources`] returns the current snapshot.
///
/// # Examples
///
/// ```no_run
/// # use ndi_bridge::{Ndi, FinderOptions, Finder};
/// # async fn run() -> Result<(), ndi_bridge::Error> {
/// let ndi = Ndi::new()?;
/// let options = FinderOptions::builder().groups(["Studio"]).build()?;
/// let finder = Finder::new(&ndi, Some(&options)).await?;
///
/// // Wait for initial discovery
/// if finder.wait_for_sources(5000).await? {
///     for source in finder.sources().await? {
///         println!("Found: {}", source);
///     }
/// }
/// finder.release().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Finder {
    handle: OwnedHandle,
    options: Option<FinderOptions>,
}

impl Finder {
    /// Creates a new source finder.
    ///
    /// `None` calls `NDIlib_find_create_v2` with no settings, which uses the
    /// SDK's own defaults and configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CreationError`] if the SDK cannot create the
    /// finder.
    pub async fn new(ndi: &Ndi, options: Option<&FinderOptions>) -> Result<Self> {
        let settings = options.map(FindSettings::new).transpose()?.map(Arc::new);
        let keep_alive = settings.clone();

        let handle = OwnedHandle::create(
            ndi,
            HandleKind::Finder,
            "NDIlib_find_create_v2",
            move |api| {
                let raw = settings.as_ref().map(|s| s.to_raw());
                // SAFETY: the settings strings outlive the call.
                Ok(RawHandle(unsafe { api.find_create_v2(raw.as_ref()) }))
            },
            move |api, raw| {
                // SAFETY: the instance is released exactly once.
                unsafe { api.find_destroy(raw.0) };
                drop(keep_alive);
            },
        )
        .await?;

        Ok(Self {
            handle,
            options: options.cloned(),
        })
    }

    /// Creates a finder from a host option bag (`None` or `null` for the
    /// no-argument path).
    pub async fn from_value(ndi: &Ndi, raw: Option<&Value>) -> Result<Self> {
        match raw {
            None | Some(Value::Null) => Self::new(ndi, None).await,
            Some(raw) => Self::new(ndi, Some(&FinderOptions::from_value(raw)?)).await,
        }
    }

    /// Waits for the source list to change.
    ///
    /// Returns `true` if the source list changed, `false` if the timeout
    /// expired (0 = no wait).
    pub async fn wait_for_sources(&self, timeout_ms: u32) -> Result<bool> {
        self.handle
            .call("NDIlib_find_wait_for_sources", move |api, raw| {
                // SAFETY: live instance, serialized by the handle lane.
                Ok(unsafe { api.find_wait_for_sources(raw.0, timeout_ms) })
            })
            .await
    }

    /// Gets the current list of discovered sources (snapshot).
    pub async fn sources(&self) -> Result<Vec<Source>> {
        self.handle
            .call("NDIlib_find_get_current_sources", |api, raw| {
                let mut count = 0u32;
                // SAFETY: live instance; the returned array stays valid until
                // the next call on this finder, and the lane keeps that call out.
                let sources = unsafe { api.find_get_current_sources(raw.0, &mut count) };
                if sources.is_null() {
                    return Ok(Vec::new());
                }
                // SAFETY: the array holds `count` descriptors.
                Ok((0..count as usize)
                    .map(|i| unsafe { Source::from_raw(&*sources.add(i)) })
                    .collect())
            })
            .await
    }

    /// Destroys the native finder. A second release fails with
    /// [`crate::Error::UseAfterFree`].
    pub async fn release(&self) -> Result<()> {
        self.handle.release().await
    }

    pub fn state(&self) -> ResourceState {
        self.handle.state()
    }

    /// The options the finder was created with, `None` for the no-argument path.
    pub fn options(&self) -> Option<&FinderOptions> {
        self.options.as_ref()
    }
}

/// Represents an NDI source discovered on the network.
///
/// Sources contain a human-readable name and network address. The name
/// typically includes the machine name and source name (e.g., "MACHINE (Source)").
///
/// # Examples
///
/// ```
/// use ndi_bridge::Source;
///
/// let source = Source::with_address("LAPTOP (Camera 1)", "192.168.1.100:5960");
///
/// println!("Source: {}", source); // Displays: LAPTOP (Camera 1)@192.168.1.100:5960
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct Source {
    /// The NDI source name (e.g., "MACHINE (Source Name)").
    pub name: String,
    /// The address for connecting to this source, if the SDK reported one.
    pub url_address: Option<String>,
}

// Holds the CStrings the raw descriptor points into.
pub(crate) struct RawSource {
    _name: CString,
    _url_address: Option<CString>,
    pub raw: NDIlib_source_t,
}

impl Source {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url_address: None,
        }
    }

    pub fn with_address(name: impl Into<String>, url_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url_address: Some(url_address.into()),
        }
    }

    /// Check if this source matches a given host or IP address.
    ///
    /// # Examples
    ///
    /// ```
    /// use ndi_bridge::Source;
    ///
    /// let source = Source::with_address("CAMERA1 (Chan1, 192.168.0.107)", "192.168.0.107:5960");
    ///
    /// assert!(source.matches_host("192.168.0.107"));
    /// assert!(source.matches_host("CAMERA1"));
    /// assert!(!source.matches_host("192.168.1.1"));
    /// ```
    pub fn matches_host(&self, host: &str) -> bool {
        self.name.contains(host)
            || self
                .url_address
                .as_deref()
                .is_some_and(|address| address.contains(host))
    }

    /// The hostname or IP portion of the address, without scheme or port.
    ///
    /// ```
    /// use ndi_bridge::Source;
    ///
    /// let source = Source::with_address("CAMERA1", "192.168.1.100:5960");
    /// assert_eq!(source.host(), Some("192.168.1.100"));
    ///
    /// let source = Source::with_address("CAMERA2", "http://camera.local:8080/ndi");
    /// assert_eq!(source.host(), Some("camera.local"));
    /// ```
    pub fn host(&self) -> Option<&str> {
        let address = self.url_address.as_deref()?;
        let without_scheme = address
            .find("://")
            .map_or(address, |idx| &address[idx + 3..]);
        let host = without_scheme
            .split(['/', ':'])
            .next()
            .unwrap_or(without_scheme);
        (!host.is_empty()).then_some(host)
    }

    /// The port of the address, if present.
    ///
    /// ```
    /// use ndi_bridge::Source;
    ///
    /// assert_eq!(Source::with_address("A", "192.168.1.100:5960").port(), Some(5960));
    /// assert_eq!(Source::with_address("B", "192.168.1.100").port(), None);
    /// assert_eq!(Source::with_address("C", "http://camera.local:8080/x").port(), Some(8080));
    /// ```
    pub fn port(&self) -> Option<u16> {
        let address = self.url_address.as_deref()?;
        let without_scheme = address
            .find("://")
            .map_or(address, |idx| &address[idx + 3..]);
        let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
        let (_, port) = authority.rsplit_once(':')?;
        port.parse().ok()
    }

    /// # Safety
    ///
    /// The pointers in `ndi_source` must be null or valid C strings.
    pub(crate) unsafe fn from_raw(ndi_source: &NDIlib_source_t) -> Self {
        let text = |p: *const std::ffi::c_char| {
            (!p.is_null()).then(|| CStr::from_ptr(p).to_string_lossy().into_owned())
        };
        Source {
            name: text(ndi_source.p_ndi_name).unwrap_or_default(),
            url_address: text(ndi_source.p_url_address).filter(|s| !s.is_empty()),
        }
    }

    /// Convert to raw format for FFI use
    pub(crate) fn to_raw(&self) -> Result<RawSource> {
        let name = CString::new(self.name.as_str())?;
        let url_address = self
            .url_address
            .as_deref()
            .map(CString::new)
            .transpose()?;

        let raw = NDIlib_source_t {
            p_ndi_name: name.as_ptr(),
            p_url_address: url_address.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
        };

        Ok(RawSource {
            _name: name,
            _url_address: url_address,
            raw,
        })
    }
}

impl Display for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.url_address {
            Some(address) => write!(f, "{}@{}", self.name, address),
            None => write!(f, "{}", self.name),
        }
    }
}
