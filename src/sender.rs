//! NDI sending functionality for video, audio, and metadata.

use std::{ffi::CString, ptr};

use bytes::Bytes;
use serde_json::Value;

use crate::{
    frames::{AudioFrame, MetadataFrame, PixelFormat, RawAudio, SendFrame, VideoFrame},
    ndi_lib::*,
    options::{self, LIST_DELIMITER},
    receiver::ColorFormat,
    registry::{HandleKind, RawHandle, ResourceState},
    runtime::OwnedHandle,
    Ndi, Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderOptions {
    pub name: String,
    /// Comma-separated groups to announce in; `None` for the SDK default.
    pub groups: Option<String>,
    pub clock_video: bool,
    pub clock_audio: bool,
    /// Layout assumed for video frames submitted without a FourCC.
    pub color_format: ColorFormat,
}

impl SenderOptions {
    /// Create a builder for configuring send options
    pub fn builder<S: Into<String>>(name: S) -> SenderOptionsBuilder {
        SenderOptionsBuilder::new(name)
    }

    /// Reads `{ name, groups, clockVideo, clockAudio, colorFormat }` from a
    /// host option bag.
    ///
    /// # Errors
    ///
    /// [`crate::Error::InvalidOption`] for a missing name or a `colorFormat`
    /// outside the recognized set.
    pub fn from_value(raw: &Value) -> Result<Self> {
        let options = options::normalize(Some(raw), &options::SEND_SCHEMA)?;
        let name = options.text("name").unwrap_or_default().to_owned();
        SenderOptionsBuilder {
            name,
            groups: options.text("groups").map(str::to_owned),
            clock_video: options.bool("clockVideo"),
            clock_audio: options.bool("clockAudio"),
            color_format: options
                .integer("colorFormat")
                .and_then(|n| ColorFormat::try_from(n as i32).ok()),
        }
        .build()
    }

    /// Pixel format for frames without an explicit FourCC.
    pub fn default_pixel_format(&self) -> PixelFormat {
        self.color_format.send_pixel_format()
    }
}

/// Builder for configuring `SenderOptions` with ergonomic method chaining
#[derive(Debug, Clone)]
pub struct SenderOptionsBuilder {
    name: String,
    groups: Option<String>,
    clock_video: Option<bool>,
    clock_audio: Option<bool>,
    color_format: Option<ColorFormat>,
}

impl SenderOptionsBuilder {
    /// Create a new builder with the specified name
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            groups: None,
            clock_video: None,
            clock_audio: None,
            color_format: None,
        }
    }

    /// Set the groups for this sender, in order.
    ///
    /// # Errors
    ///
    /// [`crate::Error::InvalidOption`] if a group contains the list delimiter.
    pub fn groups<I, S>(mut self, groups: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.groups = options::join_list("groups", groups, LIST_DELIMITER)?;
        Ok(self)
    }

    /// Configure whether to clock video
    #[must_use]
    pub fn clock_video(mut self, clock: bool) -> Self {
        self.clock_video = Some(clock);
        self
    }

    /// Configure whether to clock audio
    #[must_use]
    pub fn clock_audio(mut self, clock: bool) -> Self {
        self.clock_audio = Some(clock);
        self
    }

    #[must_use]
    pub fn color_format(mut self, format: ColorFormat) -> Self {
        self.color_format = Some(format);
        self
    }

    /// Build the `SenderOptions`
    ///
    /// # Errors
    ///
    /// [`crate::Error::InvalidOption`] if the name is empty or contains only
    /// whitespace.
    pub fn build(self) -> Result<SenderOptions> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::invalid_option(
                "name",
                "sender name cannot be empty or contain only whitespace",
            ));
        }
        Ok(SenderOptions {
            name: self.name,
            groups: self.groups,
            clock_video: self.clock_video.unwrap_or(true),
            clock_audio: self.clock_audio.unwrap_or(true),
            color_format: self.color_format.unwrap_or_default(),
        })
    }
}

// C strings for NDIlib_send_create; the SDK copies them.
struct SendSettings {
    name: CString,
    groups: Option<CString>,
    clock_video: bool,
    clock_audio: bool,
}

impl SendSettings {
    fn new(options: &SenderOptions) -> Result<Self> {
        Ok(Self {
            name: CString::new(options.name.as_str())?,
            groups: options.groups.as_deref().map(CString::new).transpose()?,
            clock_video: options.clock_video,
            clock_audio: options.clock_audio,
        })
    }

    fn to_raw(&self) -> NDIlib_send_create_t {
        NDIlib_send_create_t {
            p_ndi_name: self.name.as_ptr(),
            p_groups: self.groups.as_ref().map_or(ptr::null(), |g| g.as_ptr()),
            clock_video: self.clock_video,
            clock_audio: self.clock_audio,
        }
    }
}

/// An NDI output.
///
/// Every send validates the frame against its declared layout before
/// anything reaches the SDK. A send may block on clocking or backpressure, so
/// it runs on a worker; sends on one sender stay in call order. The sender
/// keeps a reference to the frame's buffer only for the duration of the
/// call.
///
/// # Examples
///
/// ```no_run
/// # use ndi_bridge::{Ndi, SenderOptions, VideoFrame, PixelFormat};
/// # async fn run() -> Result<(), ndi_bridge::Error> {
/// let ndi = Ndi::new()?;
/// let options = SenderOptions::builder("Test Pattern").clock_video(true).build()?;
/// let sender = ndi.sender(&options).await?;
///
/// let frame = VideoFrame::builder()
///     .resolution(1280, 720)
///     .pixel_format(PixelFormat::BGRA)
///     .frame_rate(30, 1)
///     .build()?;
/// sender.send_video(&frame).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Sender {
    handle: OwnedHandle,
    options: SenderOptions,
}

impl Sender {
    /// Creates the native sender.
    ///
    /// # Errors
    ///
    /// [`crate::Error::InvalidCString`] for text with NUL bytes (before any
    /// native call), [`crate::Error::CreationError`] if the SDK cannot create
    /// the sender, for example because the name is already in use.
    pub async fn new(ndi: &Ndi, options: &SenderOptions) -> Result<Self> {
        let settings = SendSettings::new(options)?;
        let handle = OwnedHandle::create(
            ndi,
            HandleKind::Sender,
            "NDIlib_send_create",
            move |api| {
                let raw = settings.to_raw();
                // SAFETY: the settings strings outlive the call.
                Ok(RawHandle(unsafe { api.send_create(&raw) }))
            },
            |api, raw| {
                // SAFETY: released exactly once, with no send in flight.
                unsafe { api.send_destroy(raw.0) }
            },
        )
        .await?;
        tracing::debug!(name = %options.name, "sender created");
        Ok(Self {
            handle,
            options: options.clone(),
        })
    }

    /// Creates a sender from a host option bag.
    pub async fn from_value(ndi: &Ndi, raw: &Value) -> Result<Self> {
        Self::new(ndi, &SenderOptions::from_value(raw)?).await
    }

    /// Sends any kind of frame.
    pub async fn send(&self, frame: impl Into<SendFrame>) -> Result<()> {
        match frame.into() {
            SendFrame::Video(video) => self.send_video(&video).await,
            SendFrame::Audio(audio) => self.send_audio(&audio).await,
            SendFrame::Metadata(metadata) => self.send_metadata(&metadata).await,
        }
    }

    /// Sends a video frame.
    ///
    /// # Errors
    ///
    /// [`crate::Error::BufferSizeMismatch`] or [`crate::Error::InvalidFrame`]
    /// if the buffer does not fit the declared layout; no native call is made.
    pub async fn send_video(&self, frame: &VideoFrame) -> Result<()> {
        let raw = frame.to_raw()?;
        self.handle
            .call("NDIlib_send_send_video_v2", move |api, instance| {
                // Take all of `raw`, not just the `raw.raw` field, so the
                // buffers it owns stay on the worker until the call returns.
                let raw = raw;
                // SAFETY: the frame's buffers live in `raw` for the whole call.
                unsafe { api.send_send_video_v2(instance.0, &raw.raw) };
                Ok(())
            })
            .await
    }

    /// Sends a video frame described by a host option bag. Frames without a
    /// `fourCC` use the sender's configured color format.
    pub async fn send_video_value(&self, raw: &Value, data: Bytes) -> Result<()> {
        let frame = VideoFrame::from_value(raw, data, self.options.default_pixel_format())?;
        self.send_video(&frame).await
    }

    /// Sends an audio frame. Interleaved formats go through the SDK's
    /// conversion utilities.
    ///
    /// # Errors
    ///
    /// [`crate::Error::BufferSizeMismatch`] or [`crate::Error::InvalidFrame`]
    /// if the buffer does not fit the declared layout; no native call is made.
    pub async fn send_audio(&self, frame: &AudioFrame) -> Result<()> {
        let raw = frame.to_raw()?;
        let call = match raw.raw {
            RawAudio::Planar(_) => "NDIlib_send_send_audio_v3",
            RawAudio::Interleaved32f(_) => "NDIlib_util_send_send_audio_interleaved_32f",
            RawAudio::Interleaved16s(_) => "NDIlib_util_send_send_audio_interleaved_16s",
        };
        self.handle
            .call(call, move |api, instance| {
                let raw = raw;
                // SAFETY: the samples live in `raw` for the whole call.
                unsafe {
                    match &raw.raw {
                        RawAudio::Planar(frame) => api.send_send_audio_v3(instance.0, frame),
                        RawAudio::Interleaved32f(frame) => {
                            api.util_send_send_audio_interleaved_32f(instance.0, frame)
                        }
                        RawAudio::Interleaved16s(frame) => {
                            api.util_send_send_audio_interleaved_16s(instance.0, frame)
                        }
                    }
                }
                Ok(())
            })
            .await
    }

    /// Sends a metadata frame. The text is passed through unparsed.
    pub async fn send_metadata(&self, frame: &MetadataFrame) -> Result<()> {
        let raw = frame.to_raw()?;
        self.handle
            .call("NDIlib_send_send_metadata", move |api, instance| {
                let raw = raw;
                // SAFETY: the text lives in `raw` for the whole call.
                unsafe { api.send_send_metadata(instance.0, &raw.raw) };
                Ok(())
            })
            .await
    }

    /// Number of receivers connected, waiting up to `timeout_ms` for at least
    /// one.
    pub async fn connections(&self, timeout_ms: u32) -> Result<i32> {
        self.handle
            .call("NDIlib_send_get_no_connections", move |api, instance| {
                // SAFETY: live instance, serialized by the handle lane.
                Ok(unsafe { api.send_get_no_connections(instance.0, timeout_ms) })
            })
            .await
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &SenderOptions {
        &self.options
    }

    /// Destroys the native sender after any queued sends. A second release
    /// fails with [`crate::Error::UseAfterFree`].
    pub async fn release(&self) -> Result<()> {
        self.handle.release().await
    }

    pub fn state(&self) -> ResourceState {
        self.handle.state()
    }
}
