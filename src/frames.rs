//! Frame types for video, audio, and metadata.
//!
//! Outgoing frames ([`VideoFrame`], [`AudioFrame`], [`MetadataFrame`]) hold
//! shared, immutable buffers and are validated against their declared layout
//! before any native structure is built. Incoming frames ([`VideoFrameRef`],
//! [`AudioFrameRef`], [`MetadataFrameRef`]) are zero-copy views into memory
//! the SDK owns until the view is freed or dropped.
//!
//! No pixel or sample format conversion is ever performed.

use std::{
    borrow::Cow,
    ffi::{CStr, CString},
    fmt,
    os::raw::c_char,
    slice,
    sync::Arc,
};

use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde_json::Value;

use crate::{
    capture::{RecvAudioGuard, RecvMetadataGuard, RecvVideoGuard},
    ndi_lib::*,
    options, Error, Result,
};

/// Video pixel format identifiers (FourCC codes).
///
/// The discriminant is the packed four-character code the SDK carries in
/// `NDIlib_video_frame_v2_t::FourCC`.
///
/// This enum is marked `#[non_exhaustive]` to allow future NDI SDK versions to add new formats
/// without breaking existing code. Always use a wildcard pattern when matching.
///
/// # Examples
///
/// ```
/// use ndi_bridge::PixelFormat;
///
/// let format = PixelFormat::BGRA;
/// assert_eq!(u32::from(format), u32::from_le_bytes(*b"BGRA"));
///
/// match format {
///     PixelFormat::BGRA | PixelFormat::RGBA => println!("Full quality RGB"),
///     PixelFormat::UYVY => println!("Compressed YUV"),
///     _ => println!("Other format"),
/// }
/// ```
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u32)]
pub enum PixelFormat {
    /// YCbCr 4:2:2 format (16 bits per pixel) - bandwidth efficient.
    UYVY = NDIlib_FourCC_video_type_UYVY,
    /// YCbCr 4:2:2 with alpha channel (24 bits per pixel).
    UYVA = NDIlib_FourCC_video_type_UYVA,
    /// 16-bit YCbCr 4:2:2 format.
    P216 = NDIlib_FourCC_video_type_P216,
    /// 16-bit YCbCr 4:2:2 with alpha.
    PA16 = NDIlib_FourCC_video_type_PA16,
    /// Planar YCbCr 4:2:0 format (12 bits per pixel).
    YV12 = NDIlib_FourCC_video_type_YV12,
    /// Planar YCbCr 4:2:0 format (12 bits per pixel).
    I420 = NDIlib_FourCC_video_type_I420,
    /// Semi-planar YCbCr 4:2:0 format (12 bits per pixel).
    NV12 = NDIlib_FourCC_video_type_NV12,
    /// Blue-Green-Red-Alpha format (32 bits per pixel) - full quality.
    BGRA = NDIlib_FourCC_video_type_BGRA,
    /// Blue-Green-Red with padding (32 bits per pixel).
    BGRX = NDIlib_FourCC_video_type_BGRX,
    /// Red-Green-Blue-Alpha format (32 bits per pixel) - full quality.
    RGBA = NDIlib_FourCC_video_type_RGBA,
    /// Red-Green-Blue with padding (32 bits per pixel).
    RGBX = NDIlib_FourCC_video_type_RGBX,
}

impl PixelFormat {
    /// Whether `value` is one of the FourCC codes above.
    pub fn accepts(value: i64) -> bool {
        u32::try_from(value).is_ok_and(|code| Self::try_from(code).is_ok())
    }

    /// Planar or semi-planar 4:2:0 (YV12, I420, NV12).
    pub fn is_planar_420(self) -> bool {
        matches!(self, PixelFormat::YV12 | PixelFormat::I420 | PixelFormat::NV12)
    }

    /// Packed line stride in bytes for `width` pixels. For planar formats this
    /// is the stride of the Y plane.
    pub fn line_stride(self, width: i32) -> i32 {
        i32::try_from(self.row_bytes(width.max(0) as usize)).unwrap_or(i32::MAX)
    }

    fn row_bytes(self, width: usize) -> usize {
        match self {
            PixelFormat::BGRA | PixelFormat::BGRX | PixelFormat::RGBA | PixelFormat::RGBX => {
                width * 4
            }
            PixelFormat::UYVY => width * 2,
            PixelFormat::YV12 | PixelFormat::I420 | PixelFormat::NV12 => width,
            PixelFormat::UYVA => width * 3,
            PixelFormat::P216 | PixelFormat::PA16 => width * 4,
        }
    }
}

/// Video scan type (progressive, interlaced, or field-based).
///
/// This enum is marked `#[non_exhaustive]` to allow future NDI SDK versions to add new scan types
/// without breaking existing code. Always use a wildcard pattern when matching.
///
/// # Examples
///
/// ```
/// use ndi_bridge::ScanType;
///
/// let scan = ScanType::Progressive;
///
/// match scan {
///     ScanType::Progressive => println!("Progressive scan"),
///     ScanType::Interlaced => println!("Interlaced"),
///     _ => println!("Field-based or other"),
/// }
/// ```
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(i32)]
pub enum ScanType {
    /// Interlaced scan - both fields in one frame.
    Interlaced = NDIlib_frame_format_type_interleaved,
    /// Progressive scan - full frames rendered sequentially.
    Progressive = NDIlib_frame_format_type_progressive,
    /// Field 0 only (first field of interlaced content).
    Field0 = NDIlib_frame_format_type_field_0,
    /// Field 1 only (second field of interlaced content).
    Field1 = NDIlib_frame_format_type_field_1,
}

impl ScanType {
    pub fn accepts(value: i64) -> bool {
        i32::try_from(value).is_ok_and(|code| Self::try_from(code).is_ok())
    }
}

/// Audio sample layout and depth.
///
/// Receivers always deliver [`AudioFormat::Float32Separate`]; the interleaved
/// formats exist for sending, where the SDK converts them itself.
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u32)]
pub enum AudioFormat {
    /// 32-bit float, one contiguous plane per channel (FLTp).
    Float32Separate = 0,
    /// 32-bit float, channels interleaved per sample.
    Float32Interleaved = 1,
    /// Signed 16-bit, channels interleaved per sample.
    Int16Interleaved = 2,
}

impl AudioFormat {
    pub fn accepts(value: i64) -> bool {
        u32::try_from(value).is_ok_and(|code| Self::try_from(code).is_ok())
    }

    /// Bytes per sample.
    pub fn sample_width(self) -> usize {
        match self {
            AudioFormat::Float32Separate | AudioFormat::Float32Interleaved => 4,
            AudioFormat::Int16Interleaved => 2,
        }
    }
}

/// Maximum allowed size for video frame data (100 MiB).
/// Applies to both compressed and uncompressed video frames.
const MAX_VIDEO_BYTES: usize = 100 * 1024 * 1024;

/// Maximum allowed size for audio frame data (64 MiB).
/// Comfortably above typical NDI audio frames while preventing unbounded allocations.
const MAX_AUDIO_BYTES: usize = 64 * 1024 * 1024;

/// Ceiling division by 2 for computing subsampled plane dimensions.
/// For odd values, rounds up (e.g., 1920/2 = 960, 1921/2 = 961).
#[inline]
fn ceil_div2(x: usize) -> usize {
    x.div_ceil(2)
}

/// Bytes an uncompressed frame occupies for a given Y-plane stride magnitude.
///
/// - **Packed** (BGRA/BGRX/RGBA/RGBX/UYVY/UYVA/P216/PA16): `stride * height`
/// - **Planar 4:2:0 YV12/I420**: Y + U + V, the chroma planes at half stride
///   and `ceil(height/2)` rows
/// - **Semi-planar 4:2:0 NV12**: Y + interleaved UV at full stride and
///   `ceil(height/2)` rows
pub(crate) fn uncompressed_buffer_len(fmt: PixelFormat, stride: usize, height: usize) -> usize {
    let y_size = stride * height;
    let chroma_height = ceil_div2(height);
    match fmt {
        PixelFormat::YV12 | PixelFormat::I420 => y_size + 2 * (stride / 2) * chroma_height,
        PixelFormat::NV12 => y_size + stride * chroma_height,
        _ => y_size,
    }
}

/// An outgoing video frame.
///
/// `line_stride_bytes` of 0 means "packed": the stride is derived from the
/// width and pixel format. A negative stride describes a bottom-up buffer:
/// `data` starts with the last row on screen and the native frame's data
/// pointer is set to the top row.
#[derive(Clone)]
pub struct VideoFrame {
    pub width: i32,
    pub height: i32,
    pub pixel_format: PixelFormat,
    pub frame_rate_n: i32,
    pub frame_rate_d: i32,
    /// 0 lets the receiver assume square pixels.
    pub picture_aspect_ratio: f32,
    pub scan_type: ScanType,
    pub timecode: i64,
    pub line_stride_bytes: i32,
    /// Per-frame metadata (XML text).
    pub metadata: Option<String>,
    pub data: Bytes,
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixel_format", &self.pixel_format)
            .field("frame_rate_n", &self.frame_rate_n)
            .field("frame_rate_d", &self.frame_rate_d)
            .field("picture_aspect_ratio", &self.picture_aspect_ratio)
            .field("scan_type", &self.scan_type)
            .field("timecode", &self.timecode)
            .field("line_stride_bytes", &self.line_stride_bytes)
            .field("metadata", &self.metadata)
            .field("data (bytes)", &self.data.len())
            .finish()
    }
}

/// A native video frame plus the buffers its pointers refer to.
pub(crate) struct RawVideoFrame {
    pub(crate) raw: NDIlib_video_frame_v2_t,
    _metadata: Option<CString>,
    _data: Bytes,
}

// SAFETY: the raw pointers refer only to the owned buffers kept alongside.
unsafe impl Send for RawVideoFrame {}

impl VideoFrame {
    pub fn builder() -> VideoFrameBuilder {
        VideoFrameBuilder::new()
    }

    /// Reads a frame description from a host option bag.
    ///
    /// Recognized keys: `xres`, `yres` (required), `fourCC`, `frameRateN`,
    /// `frameRateD`, `pictureAspectRatio`, `frameFormatType`,
    /// `lineStrideBytes`, `timecode`, `metadata`. Frames without `fourCC` use
    /// `default_format`.
    pub fn from_value(raw: &Value, data: Bytes, default_format: PixelFormat) -> Result<Self> {
        let options = options::normalize(Some(raw), &options::VIDEO_FRAME_SCHEMA)?;
        let int = |key: &str| options.integer(key).unwrap_or_default();

        let pixel_format = match options.integer("fourCC") {
            Some(code) => PixelFormat::try_from(code as u32)
                .map_err(|_| Error::invalid_option("fourCC", format!("{code} is not a FourCC")))?,
            None => default_format,
        };
        let scan_type = ScanType::try_from(int("frameFormatType") as i32)
            .map_err(|_| Error::invalid_option("frameFormatType", "not a frame format type"))?;

        let frame = VideoFrame {
            width: int("xres") as i32,
            height: int("yres") as i32,
            pixel_format,
            frame_rate_n: int("frameRateN") as i32,
            frame_rate_d: int("frameRateD") as i32,
            picture_aspect_ratio: options.float("pictureAspectRatio").unwrap_or(0.0) as f32,
            scan_type,
            timecode: options
                .integer("timecode")
                .unwrap_or(NDIlib_send_timecode_synthesize),
            line_stride_bytes: int("lineStrideBytes") as i32,
            metadata: options.text("metadata").map(str::to_owned),
            data,
        };
        frame.validate()?;
        Ok(frame)
    }

    /// The stride actually sent: `line_stride_bytes`, or the packed stride
    /// when that is 0.
    pub fn line_stride(&self) -> i32 {
        if self.line_stride_bytes != 0 {
            self.line_stride_bytes
        } else {
            self.pixel_format.line_stride(self.width)
        }
    }

    /// Minimum buffer length for the declared layout. Never less than
    /// `height * |stride|`.
    pub fn required_len(&self) -> usize {
        uncompressed_buffer_len(
            self.pixel_format,
            self.line_stride().unsigned_abs() as usize,
            self.height.max(0) as usize,
        )
    }

    /// Checks the declared layout against the buffer.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidFrame`] for impossible dimensions or strides, and
    /// [`Error::BufferSizeMismatch`] when `data` is shorter than
    /// [`VideoFrame::required_len`].
    pub fn validate(&self) -> Result<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(Error::InvalidFrame(format!(
                "invalid resolution {}x{}",
                self.width, self.height
            )));
        }
        if self.frame_rate_n <= 0 || self.frame_rate_d <= 0 {
            return Err(Error::InvalidFrame(format!(
                "invalid frame rate {}/{}",
                self.frame_rate_n, self.frame_rate_d
            )));
        }

        let stride = self.line_stride();
        if stride < 0 && self.pixel_format.is_planar_420() {
            return Err(Error::InvalidFrame(format!(
                "{:?} does not support a negative stride",
                self.pixel_format
            )));
        }
        let row = self.pixel_format.row_bytes(self.width as usize);
        if (stride.unsigned_abs() as usize) < row {
            return Err(Error::InvalidFrame(format!(
                "stride {stride} is shorter than one {:?} row of {row} bytes",
                self.pixel_format
            )));
        }

        let required = self.required_len();
        if required > MAX_VIDEO_BYTES {
            return Err(Error::InvalidFrame(format!(
                "frame needs {required} bytes, more than the {MAX_VIDEO_BYTES} byte limit"
            )));
        }
        if self.data.len() < required {
            return Err(Error::BufferSizeMismatch {
                required,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Validates the frame and builds the native structure.
    pub(crate) fn to_raw(&self) -> Result<RawVideoFrame> {
        self.validate()?;
        let metadata = self.metadata.as_deref().map(CString::new).transpose()?;
        let data = self.data.clone();

        let stride = self.line_stride();
        let mut p_data = data.as_ptr() as *mut u8;
        if stride < 0 {
            let top_row = (self.height as usize - 1) * stride.unsigned_abs() as usize;
            p_data = p_data.wrapping_add(top_row);
        }

        let raw = NDIlib_video_frame_v2_t {
            xres: self.width,
            yres: self.height,
            FourCC: self.pixel_format.into(),
            frame_rate_N: self.frame_rate_n,
            frame_rate_D: self.frame_rate_d,
            picture_aspect_ratio: self.picture_aspect_ratio,
            frame_format_type: self.scan_type.into(),
            timecode: self.timecode,
            p_data,
            line_stride_or_data_size_in_bytes: stride,
            p_metadata: metadata.as_ref().map_or(std::ptr::null(), |m| m.as_ptr()),
            timestamp: 0,
        };
        Ok(RawVideoFrame {
            raw,
            _metadata: metadata,
            _data: data,
        })
    }
}

/// Builder for configuring a [`VideoFrame`].
///
/// # Examples
///
/// ```
/// use ndi_bridge::{PixelFormat, VideoFrame};
///
/// let frame = VideoFrame::builder()
///     .resolution(1920, 1080)
///     .pixel_format(PixelFormat::BGRA)
///     .frame_rate(60, 1)
///     .build()?;
/// assert_eq!(frame.data.len(), 1920 * 1080 * 4);
/// # Ok::<(), ndi_bridge::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct VideoFrameBuilder {
    width: i32,
    height: i32,
    pixel_format: PixelFormat,
    frame_rate_n: i32,
    frame_rate_d: i32,
    picture_aspect_ratio: f32,
    scan_type: ScanType,
    timecode: i64,
    line_stride_bytes: i32,
    metadata: Option<String>,
    data: Option<Bytes>,
}

impl VideoFrameBuilder {
    /// Defaults: 1920x1080 BGRA, 60/1 progressive, synthesized timecode.
    pub fn new() -> Self {
        Self {
            width: 1920,
            height: 1080,
            pixel_format: PixelFormat::BGRA,
            frame_rate_n: 60,
            frame_rate_d: 1,
            picture_aspect_ratio: 16.0 / 9.0,
            scan_type: ScanType::Progressive,
            timecode: NDIlib_send_timecode_synthesize,
            line_stride_bytes: 0,
            metadata: None,
            data: None,
        }
    }

    #[must_use]
    pub fn resolution(mut self, width: i32, height: i32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    #[must_use]
    pub fn pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    #[must_use]
    pub fn frame_rate(mut self, numerator: i32, denominator: i32) -> Self {
        self.frame_rate_n = numerator;
        self.frame_rate_d = denominator;
        self
    }

    #[must_use]
    pub fn aspect_ratio(mut self, ratio: f32) -> Self {
        self.picture_aspect_ratio = ratio;
        self
    }

    #[must_use]
    pub fn scan_type(mut self, scan_type: ScanType) -> Self {
        self.scan_type = scan_type;
        self
    }

    #[must_use]
    pub fn timecode(mut self, tc: i64) -> Self {
        self.timecode = tc;
        self
    }

    /// Explicit line stride in bytes; negative for bottom-up buffers.
    #[must_use]
    pub fn line_stride(mut self, stride: i32) -> Self {
        self.line_stride_bytes = stride;
        self
    }

    #[must_use]
    pub fn metadata<S: Into<String>>(mut self, meta: S) -> Self {
        self.metadata = Some(meta.into());
        self
    }

    /// Frame data. Without it, `build` allocates a zeroed buffer.
    #[must_use]
    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Build the VideoFrame
    ///
    /// # Errors
    ///
    /// Same as [`VideoFrame::validate`].
    pub fn build(self) -> Result<VideoFrame> {
        let mut frame = VideoFrame {
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
            frame_rate_n: self.frame_rate_n,
            frame_rate_d: self.frame_rate_d,
            picture_aspect_ratio: self.picture_aspect_ratio,
            scan_type: self.scan_type,
            timecode: self.timecode,
            line_stride_bytes: self.line_stride_bytes,
            metadata: self.metadata,
            data: Bytes::new(),
        };
        frame.data = match self.data {
            Some(data) => data,
            None => {
                let len = frame.required_len();
                if len > MAX_VIDEO_BYTES {
                    return Err(Error::InvalidFrame(format!(
                        "frame needs {len} bytes, more than the {MAX_VIDEO_BYTES} byte limit"
                    )));
                }
                Bytes::from(vec![0u8; len])
            }
        };
        frame.validate()?;
        Ok(frame)
    }
}

impl Default for VideoFrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Sample storage for an outgoing audio frame.
#[derive(Clone)]
pub enum AudioData {
    F32(Arc<[f32]>),
    I16(Arc<[i16]>),
}

impl AudioData {
    /// Length in samples.
    pub fn len(&self) -> usize {
        match self {
            AudioData::F32(samples) => samples.len(),
            AudioData::I16(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            AudioData::F32(samples) => std::mem::size_of_val(&samples[..]),
            AudioData::I16(samples) => std::mem::size_of_val(&samples[..]),
        }
    }
}

impl fmt::Debug for AudioData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioData::F32(samples) => write!(f, "F32({} samples)", samples.len()),
            AudioData::I16(samples) => write!(f, "I16({} samples)", samples.len()),
        }
    }
}

impl From<Vec<f32>> for AudioData {
    fn from(samples: Vec<f32>) -> Self {
        AudioData::F32(samples.into())
    }
}

impl From<Vec<i16>> for AudioData {
    fn from(samples: Vec<i16>) -> Self {
        AudioData::I16(samples.into())
    }
}

/// An outgoing audio frame.
///
/// For [`AudioFormat::Float32Separate`] the channels are laid out one after
/// another, `channel_stride_bytes` apart (0 means tightly packed). The
/// interleaved formats ignore the channel stride.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub sample_rate: i32,
    pub num_channels: i32,
    pub num_samples: i32,
    pub timecode: i64,
    pub format: AudioFormat,
    pub channel_stride_bytes: i32,
    /// Headroom in dB for 16-bit audio; 0 maps full scale to +0 dBu.
    pub reference_level: i32,
    pub metadata: Option<String>,
    pub data: AudioData,
}

pub(crate) enum RawAudio {
    Planar(NDIlib_audio_frame_v3_t),
    Interleaved32f(NDIlib_audio_frame_interleaved_32f_t),
    Interleaved16s(NDIlib_audio_frame_interleaved_16s_t),
}

/// A native audio frame plus the buffers its pointers refer to.
pub(crate) struct RawAudioFrame {
    pub(crate) raw: RawAudio,
    _metadata: Option<CString>,
    _data: AudioData,
}

// SAFETY: the raw pointers refer only to the owned buffers kept alongside.
unsafe impl Send for RawAudioFrame {}

impl AudioFrame {
    pub fn builder() -> AudioFrameBuilder {
        AudioFrameBuilder::new()
    }

    /// The planar channel stride actually sent.
    pub fn channel_stride(&self) -> i32 {
        if self.channel_stride_bytes != 0 {
            self.channel_stride_bytes
        } else {
            self.num_samples.saturating_mul(self.format.sample_width() as i32)
        }
    }

    /// Minimum buffer length in bytes: `channels * samples * width`, or the
    /// stride-implied planar layout if that is larger.
    pub fn required_len(&self) -> usize {
        let channels = self.num_channels.max(0) as usize;
        let samples = self.num_samples.max(0) as usize;
        let width = self.format.sample_width();
        let packed = channels * samples * width;
        match self.format {
            AudioFormat::Float32Separate if channels > 0 => {
                let stride = self.channel_stride().max(0) as usize;
                packed.max((channels - 1) * stride + samples * width)
            }
            _ => packed,
        }
    }

    /// Checks the declared layout against the buffer.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidFrame`] for impossible parameters or a sample type
    /// that does not match `format`, and [`Error::BufferSizeMismatch`] when
    /// `data` is shorter than [`AudioFrame::required_len`].
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate <= 0 || self.num_channels <= 0 || self.num_samples <= 0 {
            return Err(Error::InvalidFrame(format!(
                "invalid audio layout: {} Hz, {} channels, {} samples",
                self.sample_rate, self.num_channels, self.num_samples
            )));
        }
        let matches = matches!(
            (self.format, &self.data),
            (
                AudioFormat::Float32Separate | AudioFormat::Float32Interleaved,
                AudioData::F32(_)
            ) | (AudioFormat::Int16Interleaved, AudioData::I16(_))
        );
        if !matches {
            return Err(Error::InvalidFrame(format!(
                "{:?} samples do not match {:?}",
                self.data, self.format
            )));
        }
        if self.format == AudioFormat::Float32Separate {
            let stride = self.channel_stride();
            let plane = self.num_samples as i64 * 4;
            if stride % 4 != 0 || (stride as i64) < plane {
                return Err(Error::InvalidFrame(format!(
                    "channel stride {stride} does not fit {} float samples",
                    self.num_samples
                )));
            }
        }

        let required = self.required_len();
        if required > MAX_AUDIO_BYTES {
            return Err(Error::InvalidFrame(format!(
                "frame needs {required} bytes, more than the {MAX_AUDIO_BYTES} byte limit"
            )));
        }
        let actual = self.data.byte_len();
        if actual < required {
            return Err(Error::BufferSizeMismatch { required, actual });
        }
        Ok(())
    }

    /// Validates the frame and builds the native structure for its format.
    pub(crate) fn to_raw(&self) -> Result<RawAudioFrame> {
        self.validate()?;
        let metadata = self.metadata.as_deref().map(CString::new).transpose()?;
        let data = self.data.clone();

        let raw = match (&data, self.format) {
            (AudioData::F32(samples), AudioFormat::Float32Separate) => {
                RawAudio::Planar(NDIlib_audio_frame_v3_t {
                    sample_rate: self.sample_rate,
                    no_channels: self.num_channels,
                    no_samples: self.num_samples,
                    timecode: self.timecode,
                    FourCC: NDIlib_FourCC_audio_type_FLTP,
                    p_data: samples.as_ptr() as *mut u8,
                    channel_stride_or_data_size_in_bytes: self.channel_stride(),
                    p_metadata: metadata.as_ref().map_or(std::ptr::null(), |m| m.as_ptr()),
                    timestamp: 0,
                })
            }
            (AudioData::F32(samples), _) => {
                RawAudio::Interleaved32f(NDIlib_audio_frame_interleaved_32f_t {
                    sample_rate: self.sample_rate,
                    no_channels: self.num_channels,
                    no_samples: self.num_samples,
                    timecode: self.timecode,
                    p_data: samples.as_ptr() as *mut f32,
                })
            }
            (AudioData::I16(samples), _) => {
                RawAudio::Interleaved16s(NDIlib_audio_frame_interleaved_16s_t {
                    sample_rate: self.sample_rate,
                    no_channels: self.num_channels,
                    no_samples: self.num_samples,
                    timecode: self.timecode,
                    reference_level: self.reference_level,
                    p_data: samples.as_ptr() as *mut i16,
                })
            }
        };
        Ok(RawAudioFrame {
            raw,
            _metadata: metadata,
            _data: data,
        })
    }
}

/// Builder for configuring an [`AudioFrame`].
///
/// # Examples
///
/// ```
/// use ndi_bridge::{AudioFormat, AudioFrame};
///
/// let frame = AudioFrame::builder()
///     .sample_rate(48000)
///     .channels(2)
///     .samples(1024)
///     .format(AudioFormat::Int16Interleaved)
///     .build()?;
/// assert_eq!(frame.data.len(), 2048);
/// # Ok::<(), ndi_bridge::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct AudioFrameBuilder {
    sample_rate: i32,
    num_channels: i32,
    num_samples: i32,
    timecode: i64,
    format: AudioFormat,
    channel_stride_bytes: i32,
    reference_level: i32,
    metadata: Option<String>,
    data: Option<AudioData>,
}

impl AudioFrameBuilder {
    /// Defaults: 48 kHz stereo, 1600 samples, float32 separate.
    pub fn new() -> Self {
        Self {
            sample_rate: 48_000,
            num_channels: 2,
            num_samples: 1600,
            timecode: NDIlib_send_timecode_synthesize,
            format: AudioFormat::Float32Separate,
            channel_stride_bytes: 0,
            reference_level: 0,
            metadata: None,
            data: None,
        }
    }

    #[must_use]
    pub fn sample_rate(mut self, rate: i32) -> Self {
        self.sample_rate = rate;
        self
    }

    #[must_use]
    pub fn channels(mut self, channels: i32) -> Self {
        self.num_channels = channels;
        self
    }

    #[must_use]
    pub fn samples(mut self, samples: i32) -> Self {
        self.num_samples = samples;
        self
    }

    #[must_use]
    pub fn timecode(mut self, tc: i64) -> Self {
        self.timecode = tc;
        self
    }

    #[must_use]
    pub fn format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }

    /// Planar channel stride in bytes.
    #[must_use]
    pub fn channel_stride(mut self, stride: i32) -> Self {
        self.channel_stride_bytes = stride;
        self
    }

    #[must_use]
    pub fn reference_level(mut self, db: i32) -> Self {
        self.reference_level = db;
        self
    }

    #[must_use]
    pub fn metadata<S: Into<String>>(mut self, meta: S) -> Self {
        self.metadata = Some(meta.into());
        self
    }

    /// Sample data. Without it, `build` allocates silence.
    #[must_use]
    pub fn data(mut self, data: impl Into<AudioData>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// # Errors
    ///
    /// Same as [`AudioFrame::validate`].
    pub fn build(self) -> Result<AudioFrame> {
        let mut frame = AudioFrame {
            sample_rate: self.sample_rate,
            num_channels: self.num_channels,
            num_samples: self.num_samples,
            timecode: self.timecode,
            format: self.format,
            channel_stride_bytes: self.channel_stride_bytes,
            reference_level: self.reference_level,
            metadata: self.metadata,
            data: AudioData::F32(Arc::from(Vec::new())),
        };
        frame.data = match self.data {
            Some(data) => data,
            None => {
                let len = frame.required_len();
                if len > MAX_AUDIO_BYTES {
                    return Err(Error::InvalidFrame(format!(
                        "frame needs {len} bytes, more than the {MAX_AUDIO_BYTES} byte limit"
                    )));
                }
                let samples = len / frame.format.sample_width();
                match frame.format {
                    AudioFormat::Int16Interleaved => vec![0i16; samples].into(),
                    _ => vec![0f32; samples].into(),
                }
            }
        };
        frame.validate()?;
        Ok(frame)
    }
}

impl Default for AudioFrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An outgoing metadata frame. The payload is opaque text (usually XML).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFrame {
    pub data: String,
    pub timecode: i64,
}

pub(crate) struct RawMetadataFrame {
    pub(crate) raw: NDIlib_metadata_frame_t,
    _data: CString,
}

// SAFETY: the raw pointer refers only to the owned string kept alongside.
unsafe impl Send for RawMetadataFrame {}

impl MetadataFrame {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            timecode: NDIlib_send_timecode_synthesize,
        }
    }

    pub fn with_timecode(data: impl Into<String>, timecode: i64) -> Self {
        Self {
            data: data.into(),
            timecode,
        }
    }

    pub(crate) fn to_raw(&self) -> Result<RawMetadataFrame> {
        let data = CString::new(self.data.as_str())?;
        let length = i32::try_from(data.as_bytes_with_nul().len())
            .map_err(|_| Error::InvalidFrame("metadata payload too large".into()))?;
        let raw = NDIlib_metadata_frame_t {
            length,
            timecode: self.timecode,
            p_data: data.as_ptr() as *mut c_char,
        };
        Ok(RawMetadataFrame { raw, _data: data })
    }
}

/// A frame to transmit.
#[derive(Debug, Clone)]
pub enum SendFrame {
    Video(VideoFrame),
    Audio(AudioFrame),
    Metadata(MetadataFrame),
}

impl From<VideoFrame> for SendFrame {
    fn from(frame: VideoFrame) -> Self {
        SendFrame::Video(frame)
    }
}

impl From<AudioFrame> for SendFrame {
    fn from(frame: AudioFrame) -> Self {
        SendFrame::Audio(frame)
    }
}

impl From<MetadataFrame> for SendFrame {
    fn from(frame: MetadataFrame) -> Self {
        SendFrame::Metadata(frame)
    }
}

/// The outcome of one receiver poll that produced something.
///
/// A poll that times out is `None` at the call site, never a variant here.
#[derive(Debug)]
pub enum Frame {
    Video(VideoFrameRef),
    Audio(AudioFrameRef),
    Metadata(MetadataFrameRef),
    /// The connection or source settings changed; there is no payload.
    StatusChange,
}

/// A received video frame, borrowed from the SDK.
///
/// The pixels are not copied. The SDK gets its buffer back when the frame is
/// dropped or [`freed`](VideoFrameRef::free); hold frames only as long as
/// needed, since the receiver's internal queue stalls while they are out.
pub struct VideoFrameRef {
    guard: RecvVideoGuard,
    pixel_format: PixelFormat,
}

impl VideoFrameRef {
    /// Validates the FourCC; an unknown code frees the frame and fails.
    pub(crate) fn new(guard: RecvVideoGuard) -> Result<Self> {
        let code = guard.frame().FourCC;
        let pixel_format = PixelFormat::try_from(code).map_err(|_| {
            Error::InvalidFrame(format!("Unknown pixel format FourCC: 0x{code:08X}"))
        })?;
        Ok(Self {
            guard,
            pixel_format,
        })
    }

    pub fn width(&self) -> i32 {
        self.guard.frame().xres
    }

    pub fn height(&self) -> i32 {
        self.guard.frame().yres
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn frame_rate_n(&self) -> i32 {
        self.guard.frame().frame_rate_N
    }

    pub fn frame_rate_d(&self) -> i32 {
        self.guard.frame().frame_rate_D
    }

    pub fn picture_aspect_ratio(&self) -> f32 {
        self.guard.frame().picture_aspect_ratio
    }

    /// Returns `ScanType::Progressive` if the SDK reports an unknown code.
    pub fn scan_type(&self) -> ScanType {
        ScanType::try_from(self.guard.frame().frame_format_type).unwrap_or(ScanType::Progressive)
    }

    pub fn timecode(&self) -> i64 {
        self.guard.frame().timecode
    }

    pub fn timestamp(&self) -> i64 {
        self.guard.frame().timestamp
    }

    /// The stride exactly as the SDK reported it. Negative for bottom-up
    /// (`BGRX_BGRA_FLIPPED`) frames.
    pub fn line_stride(&self) -> i32 {
        self.guard.frame().line_stride_or_data_size_in_bytes
    }

    /// Per-frame metadata as text, if present.
    pub fn metadata(&self) -> Option<Cow<'_, str>> {
        let p_metadata = self.guard.frame().p_metadata;
        if p_metadata.is_null() {
            None
        } else {
            // SAFETY: non-null per-frame metadata is a NUL-terminated string
            // owned by the captured frame, which the guard keeps alive.
            Some(unsafe { CStr::from_ptr(p_metadata) }.to_string_lossy())
        }
    }

    /// The whole frame region in memory order, without copying.
    ///
    /// For a negative stride the region starts at the bottom row; use
    /// [`VideoFrameRef::line`] for top-down access.
    pub fn data(&self) -> &[u8] {
        let frame = self.guard.frame();
        let stride = self.line_stride();
        if frame.p_data.is_null() || stride == 0 || frame.yres <= 0 {
            return &[];
        }
        let rows = frame.yres as usize - 1;
        let len = uncompressed_buffer_len(
            self.pixel_format,
            stride.unsigned_abs() as usize,
            frame.yres as usize,
        );
        let start = if stride < 0 {
            frame.p_data.wrapping_sub(rows * stride.unsigned_abs() as usize)
        } else {
            frame.p_data
        };
        // SAFETY: the SDK guarantees the frame covers the declared layout.
        unsafe { slice::from_raw_parts(start, len) }
    }

    /// Row `y` counted from the top, honoring a negative stride. For planar
    /// formats this addresses the Y plane.
    pub fn line(&self, y: usize) -> Option<&[u8]> {
        let frame = self.guard.frame();
        let stride = self.line_stride();
        if frame.p_data.is_null() || stride == 0 || y >= frame.yres.max(0) as usize {
            return None;
        }
        let offset = y as isize * stride as isize;
        let row = frame.p_data.wrapping_offset(offset);
        // SAFETY: y is in range, so the row lies inside the frame region.
        Some(unsafe { slice::from_raw_parts(row, stride.unsigned_abs() as usize) })
    }

    /// Copies the frame into an owned [`VideoFrame`] with the same stride.
    pub fn to_owned(&self) -> VideoFrame {
        VideoFrame {
            width: self.width(),
            height: self.height(),
            pixel_format: self.pixel_format,
            frame_rate_n: self.frame_rate_n(),
            frame_rate_d: self.frame_rate_d(),
            picture_aspect_ratio: self.picture_aspect_ratio(),
            scan_type: self.scan_type(),
            timecode: self.timecode(),
            line_stride_bytes: self.line_stride(),
            metadata: self.metadata().map(Cow::into_owned),
            data: Bytes::copy_from_slice(self.data()),
        }
    }

    /// Returns the buffer to the SDK now.
    pub fn free(self) {}
}

impl fmt::Debug for VideoFrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrameRef")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("pixel_format", &self.pixel_format())
            .field("frame_rate_n", &self.frame_rate_n())
            .field("frame_rate_d", &self.frame_rate_d())
            .field("scan_type", &self.scan_type())
            .field("line_stride", &self.line_stride())
            .field("timecode", &self.timecode())
            .field("data (bytes)", &self.data().len())
            .finish()
    }
}

/// A received audio frame, borrowed from the SDK.
///
/// Always float32 separate: one plane per channel, `channel_stride_in_bytes`
/// apart.
pub struct AudioFrameRef {
    guard: RecvAudioGuard,
}

impl AudioFrameRef {
    pub(crate) fn new(guard: RecvAudioGuard) -> Result<Self> {
        let frame = guard.frame();
        if frame.FourCC != NDIlib_FourCC_audio_type_FLTP {
            return Err(Error::InvalidFrame(format!(
                "Unsupported audio FourCC: 0x{:08X}",
                frame.FourCC
            )));
        }
        if !frame.p_data.is_null() && frame.no_channels > 0 && frame.no_samples > 0 {
            let stride = frame.channel_stride_or_data_size_in_bytes;
            let plane = frame.no_samples as i64 * 4;
            if frame.p_data.align_offset(std::mem::align_of::<f32>()) != 0 {
                return Err(Error::InvalidFrame("audio buffer is not float aligned".into()));
            }
            if stride % 4 != 0 || (frame.no_channels > 1 && (stride as i64) < plane) {
                return Err(Error::InvalidFrame(format!(
                    "channel stride {stride} does not fit {} float samples",
                    frame.no_samples
                )));
            }
        }
        Ok(Self { guard })
    }

    pub fn sample_rate(&self) -> i32 {
        self.guard.frame().sample_rate
    }

    pub fn num_channels(&self) -> i32 {
        self.guard.frame().no_channels
    }

    pub fn num_samples(&self) -> i32 {
        self.guard.frame().no_samples
    }

    pub fn timecode(&self) -> i64 {
        self.guard.frame().timecode
    }

    pub fn timestamp(&self) -> i64 {
        self.guard.frame().timestamp
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat::Float32Separate
    }

    pub fn channel_stride_in_bytes(&self) -> i32 {
        self.guard.frame().channel_stride_or_data_size_in_bytes
    }

    pub fn metadata(&self) -> Option<Cow<'_, str>> {
        let p_metadata = self.guard.frame().p_metadata;
        if p_metadata.is_null() {
            None
        } else {
            // SAFETY: non-null per-frame metadata is a NUL-terminated string
            // owned by the captured frame, which the guard keeps alive.
            Some(unsafe { CStr::from_ptr(p_metadata) }.to_string_lossy())
        }
    }

    fn stride_in_samples(&self) -> usize {
        self.channel_stride_in_bytes().max(0) as usize / 4
    }

    /// Every channel plane, including any padding between planes.
    pub fn data(&self) -> &[f32] {
        let frame = self.guard.frame();
        if frame.p_data.is_null() || frame.no_channels <= 0 || frame.no_samples <= 0 {
            return &[];
        }
        let len = (frame.no_channels as usize - 1) * self.stride_in_samples()
            + frame.no_samples as usize;
        // SAFETY: alignment and stride were checked in `new`.
        unsafe { slice::from_raw_parts(frame.p_data as *const f32, len) }
    }

    /// The samples of one channel.
    pub fn channel(&self, channel: usize) -> Option<&[f32]> {
        let frame = self.guard.frame();
        if channel >= frame.no_channels.max(0) as usize {
            return None;
        }
        let start = channel * self.stride_in_samples();
        self.data().get(start..start + frame.no_samples.max(0) as usize)
    }

    /// Copies the frame into a packed, owned [`AudioFrame`].
    pub fn to_owned(&self) -> AudioFrame {
        let samples: Vec<f32> = (0..self.num_channels().max(0) as usize)
            .filter_map(|channel| self.channel(channel))
            .flatten()
            .copied()
            .collect();
        AudioFrame {
            sample_rate: self.sample_rate(),
            num_channels: self.num_channels(),
            num_samples: self.num_samples(),
            timecode: self.timecode(),
            format: AudioFormat::Float32Separate,
            channel_stride_bytes: 0,
            reference_level: 0,
            metadata: self.metadata().map(Cow::into_owned),
            data: samples.into(),
        }
    }

    /// Returns the buffer to the SDK now.
    pub fn free(self) {}
}

impl fmt::Debug for AudioFrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioFrameRef")
            .field("sample_rate", &self.sample_rate())
            .field("num_channels", &self.num_channels())
            .field("num_samples", &self.num_samples())
            .field("channel_stride_in_bytes", &self.channel_stride_in_bytes())
            .field("timecode", &self.timecode())
            .finish()
    }
}

/// A received metadata frame, borrowed from the SDK. The payload is never
/// parsed.
pub struct MetadataFrameRef {
    guard: RecvMetadataGuard,
}

impl MetadataFrameRef {
    pub(crate) fn new(guard: RecvMetadataGuard) -> Self {
        Self { guard }
    }

    pub fn timecode(&self) -> i64 {
        self.guard.frame().timecode
    }

    /// The raw payload without its NUL terminator.
    pub fn bytes(&self) -> &[u8] {
        let frame = self.guard.frame();
        if frame.p_data.is_null() {
            return &[];
        }
        if frame.length > 0 {
            // SAFETY: the SDK reports the payload length including the NUL.
            let bytes = unsafe { slice::from_raw_parts(frame.p_data as *const u8, frame.length as usize) };
            bytes.strip_suffix(&[0]).unwrap_or(bytes)
        } else {
            // SAFETY: without a length the SDK hands over a NUL-terminated
            // string, owned by the frame the guard keeps alive.
            unsafe { CStr::from_ptr(frame.p_data) }.to_bytes()
        }
    }

    /// The payload as text, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.bytes())
    }

    pub fn to_owned(&self) -> MetadataFrame {
        MetadataFrame::with_timecode(self.text().into_owned(), self.timecode())
    }

    /// Returns the buffer to the SDK now.
    pub fn free(self) {}
}

impl fmt::Debug for MetadataFrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataFrameRef")
            .field("timecode", &self.timecode())
            .field("text", &self.text())
            .finish()
    }
}
