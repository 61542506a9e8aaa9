//! NDI receiving functionality for video, audio, and metadata.

use std::{ffi::CString, ptr, sync::Arc};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde_json::Value;

use crate::{
    capture::{AudioKind, CaptureKind, MetadataKind, RecvGuard, VideoKind},
    finder::Source,
    frames::{AudioFrameRef, Frame, MetadataFrameRef, PixelFormat, VideoFrameRef},
    ndi_lib::*,
    options,
    registry::{HandleKind, RawHandle, ResourceState},
    runtime::OwnedHandle,
    Error, Ndi, Result,
};

/// Pixel layout the receiver asks the SDK to deliver.
///
/// The `*_BGRA`/`*_RGBA` suffix is the layout used when the source carries
/// alpha.
#[allow(non_camel_case_types)]
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(i32)]
pub enum ColorFormat {
    BGRX_BGRA = NDIlib_recv_color_format_BGRX_BGRA,
    UYVY_BGRA = NDIlib_recv_color_format_UYVY_BGRA,
    RGBX_RGBA = NDIlib_recv_color_format_RGBX_RGBA,
    UYVY_RGBA = NDIlib_recv_color_format_UYVY_RGBA,
    Fastest = NDIlib_recv_color_format_fastest,
    Best = NDIlib_recv_color_format_best,
    /// BGRX/BGRA delivered bottom-up, with a negative line stride.
    BGRX_BGRA_Flipped = NDIlib_recv_color_format_BGRX_BGRA_flipped,
}

impl Default for ColorFormat {
    fn default() -> Self {
        ColorFormat::BGRX_BGRA
    }
}

impl ColorFormat {
    pub fn accepts(value: i64) -> bool {
        i32::try_from(value).is_ok_and(|code| Self::try_from(code).is_ok())
    }

    /// The pixel layout a sender assumes for frames submitted without an
    /// explicit FourCC.
    pub fn send_pixel_format(self) -> PixelFormat {
        match self {
            ColorFormat::BGRX_BGRA | ColorFormat::BGRX_BGRA_Flipped | ColorFormat::Best => {
                PixelFormat::BGRA
            }
            ColorFormat::RGBX_RGBA => PixelFormat::RGBA,
            ColorFormat::UYVY_BGRA | ColorFormat::UYVY_RGBA | ColorFormat::Fastest => {
                PixelFormat::UYVY
            }
        }
    }
}

/// Trade-off between network load and what the receiver gets.
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(i32)]
pub enum Bandwidth {
    MetadataOnly = NDIlib_recv_bandwidth_metadata_only,
    AudioOnly = NDIlib_recv_bandwidth_audio_only,
    Lowest = NDIlib_recv_bandwidth_lowest,
    Highest = NDIlib_recv_bandwidth_highest,
}

impl Default for Bandwidth {
    fn default() -> Self {
        Bandwidth::Highest
    }
}

impl Bandwidth {
    pub fn accepts(value: i64) -> bool {
        i32::try_from(value).is_ok_and(|code| Self::try_from(code).is_ok())
    }
}

/// Configuration for an NDI receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverOptions {
    pub source: Source,
    pub color_format: ColorFormat,
    pub bandwidth: Bandwidth,
    pub allow_video_fields: bool,
    /// Name this receiver reports to the source.
    pub name: Option<String>,
}

impl ReceiverOptions {
    /// Create a builder for configuring a receiver
    pub fn builder(source: Source) -> ReceiverOptionsBuilder {
        ReceiverOptionsBuilder::new(source)
    }

    /// Reads `{ source, colorFormat, bandwidth, allowVideoFields, name }`
    /// from a host option bag.
    pub fn from_value(raw: &Value) -> Result<Self> {
        let options = options::normalize(Some(raw), &options::RECEIVE_SCHEMA)?;
        let source = options
            .source("source")
            .cloned()
            .ok_or_else(|| Error::invalid_option("source", "is required"))?;
        let color_format = options
            .integer("colorFormat")
            .and_then(|n| ColorFormat::try_from(n as i32).ok())
            .unwrap_or_default();
        let bandwidth = options
            .integer("bandwidth")
            .and_then(|n| Bandwidth::try_from(n as i32).ok())
            .unwrap_or_default();
        Ok(Self {
            source,
            color_format,
            bandwidth,
            allow_video_fields: options.bool("allowVideoFields").unwrap_or(true),
            name: options.text("name").map(str::to_owned),
        })
    }
}

/// Builder for configuring a Receiver with ergonomic method chaining
#[derive(Debug, Clone)]
pub struct ReceiverOptionsBuilder {
    source: Source,
    color_format: Option<ColorFormat>,
    bandwidth: Option<Bandwidth>,
    allow_video_fields: Option<bool>,
    name: Option<String>,
}

impl ReceiverOptionsBuilder {
    /// Create a new builder with the specified source
    pub fn new(source: Source) -> Self {
        Self {
            source,
            color_format: None,
            bandwidth: None,
            allow_video_fields: None,
            name: None,
        }
    }

    /// Set the color format for received video
    #[must_use]
    pub fn color(mut self, fmt: ColorFormat) -> Self {
        self.color_format = Some(fmt);
        self
    }

    /// Set the bandwidth mode for the receiver
    #[must_use]
    pub fn bandwidth(mut self, bw: Bandwidth) -> Self {
        self.bandwidth = Some(bw);
        self
    }

    /// Configure whether to allow video fields
    #[must_use]
    pub fn allow_video_fields(mut self, allow: bool) -> Self {
        self.allow_video_fields = Some(allow);
        self
    }

    /// Set the name for this receiver
    #[must_use]
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn build(self) -> ReceiverOptions {
        ReceiverOptions {
            source: self.source,
            color_format: self.color_format.unwrap_or_default(),
            bandwidth: self.bandwidth.unwrap_or_default(),
            allow_video_fields: self.allow_video_fields.unwrap_or(true),
            name: self.name,
        }
    }
}

// C strings for NDIlib_recv_create_v3; the SDK copies them.
struct RecvSettings {
    source_name: CString,
    url_address: Option<CString>,
    recv_name: Option<CString>,
    color_format: ColorFormat,
    bandwidth: Bandwidth,
    allow_video_fields: bool,
}

impl RecvSettings {
    fn new(options: &ReceiverOptions) -> Result<Self> {
        Ok(Self {
            source_name: CString::new(options.source.name.as_str())?,
            url_address: options
                .source
                .url_address
                .as_deref()
                .map(CString::new)
                .transpose()?,
            recv_name: options.name.as_deref().map(CString::new).transpose()?,
            color_format: options.color_format,
            bandwidth: options.bandwidth,
            allow_video_fields: options.allow_video_fields,
        })
    }

    fn to_raw(&self) -> NDIlib_recv_create_v3_t {
        NDIlib_recv_create_v3_t {
            source_to_connect_to: NDIlib_source_t {
                p_ndi_name: self.source_name.as_ptr(),
                p_url_address: self.url_address.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
            },
            color_format: self.color_format.into(),
            bandwidth: self.bandwidth.into(),
            allow_video_fields: self.allow_video_fields,
            p_ndi_recv_name: self.recv_name.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
        }
    }
}

/// A connection to one NDI source.
///
/// Each capture is a discrete poll. Captures on one receiver run one at a
/// time in call order; captures on different receivers run in parallel.
///
/// # Examples
///
/// ```no_run
/// # use ndi_bridge::{Frame, Ndi, ReceiverOptions, Source};
/// # async fn run() -> Result<(), ndi_bridge::Error> {
/// let ndi = Ndi::new()?;
/// let options = ReceiverOptions::builder(Source::new("STUDIO (Camera 1)")).build();
/// let receiver = ndi.receiver(&options).await?;
///
/// match receiver.capture(1000).await? {
///     Some(Frame::Video(video)) => println!("{}x{}", video.width(), video.height()),
///     Some(other) => println!("{other:?}"),
///     None => println!("nothing within a second"),
/// }
/// receiver.release().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Receiver {
    handle: OwnedHandle,
    options: ReceiverOptions,
}

impl Receiver {
    /// Connects to `options.source`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCString`] for text with NUL bytes (before any native
    /// call), [`Error::CreationError`] if the SDK cannot create the receiver.
    pub async fn new(ndi: &Ndi, options: &ReceiverOptions) -> Result<Self> {
        let settings = RecvSettings::new(options)?;
        let handle = OwnedHandle::create(
            ndi,
            HandleKind::Receiver,
            "NDIlib_recv_create_v3",
            move |api| {
                let raw = settings.to_raw();
                // SAFETY: the settings strings outlive the call.
                Ok(RawHandle(unsafe { api.recv_create_v3(&raw) }))
            },
            |api, raw| {
                // SAFETY: released exactly once, after every frame is freed.
                unsafe { api.recv_destroy(raw.0) }
            },
        )
        .await?;
        tracing::debug!(source = %options.source, "receiver connected");
        Ok(Self {
            handle,
            options: options.clone(),
        })
    }

    /// Creates a receiver from a host option bag.
    pub async fn from_value(ndi: &Ndi, raw: &Value) -> Result<Self> {
        Self::new(ndi, &ReceiverOptions::from_value(raw)?).await
    }

    /// Polls for the next frame of any kind, waiting up to `timeout_ms`.
    ///
    /// Returns `Ok(None)` when the timeout elapses without data; a timeout of
    /// 0 never blocks.
    ///
    /// # Errors
    ///
    /// [`Error::NativeCallError`] if the SDK reports a lost connection,
    /// [`Error::InvalidFrame`] for a frame in a layout this crate cannot
    /// represent, [`Error::UseAfterFree`] after release.
    pub async fn capture(&self, timeout_ms: u32) -> Result<Option<Frame>> {
        self.warn_if_outstanding();
        let ndi = self.handle.ndi().clone();
        let slot = Arc::clone(self.handle.slot());
        self.handle
            .call("NDIlib_recv_capture_v3", move |api, raw| {
                let mut video = NDIlib_video_frame_v2_t::default();
                let mut audio = NDIlib_audio_frame_v3_t::default();
                let mut metadata = NDIlib_metadata_frame_t::default();
                // SAFETY: live instance, serialized by the handle lane.
                let frame_type = unsafe {
                    api.recv_capture_v3(raw.0, &mut video, &mut audio, &mut metadata, timeout_ms)
                };

                // SAFETY (guards): each frame was filled by the capture above
                // with the matching frame type.
                match frame_type {
                    NDIlib_frame_type_none => Ok(None),
                    NDIlib_frame_type_video => {
                        let guard = unsafe { RecvGuard::<VideoKind>::new(ndi, slot, raw, video) };
                        VideoFrameRef::new(guard).map(|f| Some(Frame::Video(f)))
                    }
                    NDIlib_frame_type_audio => {
                        let guard = unsafe { RecvGuard::<AudioKind>::new(ndi, slot, raw, audio) };
                        AudioFrameRef::new(guard).map(|f| Some(Frame::Audio(f)))
                    }
                    NDIlib_frame_type_metadata => {
                        let guard =
                            unsafe { RecvGuard::<MetadataKind>::new(ndi, slot, raw, metadata) };
                        Ok(Some(Frame::Metadata(MetadataFrameRef::new(guard))))
                    }
                    NDIlib_frame_type_status_change => Ok(Some(Frame::StatusChange)),
                    other => Err(capture_failed(other)),
                }
            })
            .await
    }

    /// [`Receiver::capture`] with the configured default capture timeout.
    pub async fn recv(&self) -> Result<Option<Frame>> {
        let timeout_ms = self.handle.ndi().config().default_capture_timeout_ms;
        self.capture(timeout_ms).await
    }

    /// Polls for video only. Audio and metadata stay queued in the SDK.
    pub async fn capture_video(&self, timeout_ms: u32) -> Result<Option<VideoFrameRef>> {
        match self.capture_kind::<VideoKind>(timeout_ms).await? {
            Some(guard) => VideoFrameRef::new(guard).map(Some),
            None => Ok(None),
        }
    }

    /// Polls for audio only.
    pub async fn capture_audio(&self, timeout_ms: u32) -> Result<Option<AudioFrameRef>> {
        match self.capture_kind::<AudioKind>(timeout_ms).await? {
            Some(guard) => AudioFrameRef::new(guard).map(Some),
            None => Ok(None),
        }
    }

    /// Polls for metadata only.
    pub async fn capture_metadata(&self, timeout_ms: u32) -> Result<Option<MetadataFrameRef>> {
        Ok(self
            .capture_kind::<MetadataKind>(timeout_ms)
            .await?
            .map(MetadataFrameRef::new))
    }

    async fn capture_kind<K>(&self, timeout_ms: u32) -> Result<Option<RecvGuard<K>>>
    where
        K: CaptureKind + 'static,
    {
        self.warn_if_outstanding();
        let ndi = self.handle.ndi().clone();
        let slot = Arc::clone(self.handle.slot());
        self.handle
            .call("NDIlib_recv_capture_v3", move |api, raw| {
                let mut frame = K::RawFrame::default();
                // SAFETY: live instance, serialized by the handle lane.
                let frame_type = unsafe { K::capture(api, raw.0, &mut frame, timeout_ms) };
                if frame_type == K::FRAME_TYPE {
                    // SAFETY: the frame was filled by the capture above.
                    Ok(Some(unsafe { RecvGuard::new(ndi, slot, raw, frame) }))
                } else if frame_type == NDIlib_frame_type_error {
                    Err(capture_failed(frame_type))
                } else {
                    Ok(None)
                }
            })
            .await
    }

    fn warn_if_outstanding(&self) {
        let outstanding = self.handle.slot().pinned();
        if outstanding > 0 {
            tracing::warn!(
                source = %self.options.source,
                outstanding,
                "capture requested while earlier frames are still held; free them to keep the receive queue moving"
            );
        }
    }

    /// The source this receiver is connected to.
    pub fn source(&self) -> &Source {
        &self.options.source
    }

    pub fn options(&self) -> &ReceiverOptions {
        &self.options
    }

    /// Received frames not yet freed.
    pub fn outstanding_frames(&self) -> usize {
        self.handle.slot().pinned()
    }

    /// Whether a capture is running on this receiver right now.
    pub fn is_busy(&self) -> bool {
        self.handle.is_busy()
    }

    /// Disconnects and destroys the native receiver once outstanding frames
    /// are freed. A second release fails with [`Error::UseAfterFree`].
    pub async fn release(&self) -> Result<()> {
        self.handle.release().await
    }

    pub fn state(&self) -> ResourceState {
        self.handle.state()
    }
}

fn capture_failed(frame_type: NDIlib_frame_type_e) -> Error {
    if frame_type == NDIlib_frame_type_error {
        Error::native("NDIlib_recv_capture_v3", "the connection to the source was lost")
    } else {
        Error::native(
            "NDIlib_recv_capture_v3",
            format!("unexpected frame type {frame_type}"),
        )
    }
}
