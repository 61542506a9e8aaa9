//! Frame capture and the RAII guard that returns captured frames to the SDK.
//!
//! The `CaptureKind` trait encapsulates the frame-type-specific parts of a
//! capture: the raw FFI frame, the frame-type constant, which slot of
//! `NDIlib_recv_capture_v3` receives it, and the matching free function.
//! [`RecvGuard`] holds a captured frame in place (no copy) until it is dropped,
//! at which point the SDK gets its buffer back.
//!
//! Frees are not routed through the receiver's call lane: the SDK allows a
//! frame to be freed from any thread while another capture is running.

use std::ptr;
use std::sync::Arc;

use crate::ndi_lib::*;
use crate::registry::{HandleSlot, RawHandle};
use crate::sdk::NdiApi;
use crate::Ndi;

/// Sealed trait module to prevent external implementations of `CaptureKind`.
mod sealed {
    pub trait Sealed {}

    impl Sealed for super::VideoKind {}
    impl Sealed for super::AudioKind {}
    impl Sealed for super::MetadataKind {}
}

/// Frame-type-specific behaviour of a capture.
///
/// # Safety
///
/// `free_frame` must only be given frames filled in by a capture that
/// returned `FRAME_TYPE`.
pub trait CaptureKind: sealed::Sealed {
    /// The raw FFI frame type from the NDI SDK.
    type RawFrame: Default + Copy;

    /// The frame type constant returned by `NDIlib_recv_capture_v3`.
    const FRAME_TYPE: NDIlib_frame_type_e;

    /// Polls for a frame of this kind only.
    ///
    /// # Safety
    ///
    /// `instance` must be a live receiver not used concurrently.
    unsafe fn capture(
        api: &dyn NdiApi,
        instance: NDIlib_recv_instance_t,
        frame: &mut Self::RawFrame,
        timeout_ms: u32,
    ) -> NDIlib_frame_type_e;

    /// # Safety
    ///
    /// - `instance` must be the receiver that produced `frame`
    /// - `frame` must have been populated by a capture that returned `FRAME_TYPE`
    unsafe fn free_frame(api: &dyn NdiApi, instance: NDIlib_recv_instance_t, frame: &Self::RawFrame);
}

/// Marker type for video frame capture operations.
pub struct VideoKind;

impl CaptureKind for VideoKind {
    type RawFrame = NDIlib_video_frame_v2_t;
    const FRAME_TYPE: NDIlib_frame_type_e = NDIlib_frame_type_video;

    unsafe fn capture(
        api: &dyn NdiApi,
        instance: NDIlib_recv_instance_t,
        frame: &mut Self::RawFrame,
        timeout_ms: u32,
    ) -> NDIlib_frame_type_e {
        api.recv_capture_v3(instance, frame, ptr::null_mut(), ptr::null_mut(), timeout_ms)
    }

    unsafe fn free_frame(api: &dyn NdiApi, instance: NDIlib_recv_instance_t, frame: &Self::RawFrame) {
        api.recv_free_video_v2(instance, frame);
    }
}

/// Marker type for audio frame capture operations.
pub struct AudioKind;

impl CaptureKind for AudioKind {
    type RawFrame = NDIlib_audio_frame_v3_t;
    const FRAME_TYPE: NDIlib_frame_type_e = NDIlib_frame_type_audio;

    unsafe fn capture(
        api: &dyn NdiApi,
        instance: NDIlib_recv_instance_t,
        frame: &mut Self::RawFrame,
        timeout_ms: u32,
    ) -> NDIlib_frame_type_e {
        api.recv_capture_v3(instance, ptr::null_mut(), frame, ptr::null_mut(), timeout_ms)
    }

    unsafe fn free_frame(api: &dyn NdiApi, instance: NDIlib_recv_instance_t, frame: &Self::RawFrame) {
        api.recv_free_audio_v3(instance, frame);
    }
}

/// Marker type for metadata frame capture operations.
pub struct MetadataKind;

impl CaptureKind for MetadataKind {
    type RawFrame = NDIlib_metadata_frame_t;
    const FRAME_TYPE: NDIlib_frame_type_e = NDIlib_frame_type_metadata;

    unsafe fn capture(
        api: &dyn NdiApi,
        instance: NDIlib_recv_instance_t,
        frame: &mut Self::RawFrame,
        timeout_ms: u32,
    ) -> NDIlib_frame_type_e {
        api.recv_capture_v3(instance, ptr::null_mut(), ptr::null_mut(), frame, timeout_ms)
    }

    unsafe fn free_frame(api: &dyn NdiApi, instance: NDIlib_recv_instance_t, frame: &Self::RawFrame) {
        api.recv_free_metadata(instance, frame);
    }
}

/// Owns one captured frame until it is handed back to the SDK.
///
/// The guard pins the receiver's handle: releasing the receiver while a frame
/// is alive only marks it released, and the native receiver is destroyed once
/// the last frame is freed.
pub(crate) struct RecvGuard<K: CaptureKind> {
    ndi: Ndi,
    slot: Arc<HandleSlot>,
    instance: RawHandle,
    frame: K::RawFrame,
}

// SAFETY: the guard only reads the frame, and NDI frames may be read and
// freed from any thread.
unsafe impl<K: CaptureKind> Send for RecvGuard<K> {}
unsafe impl<K: CaptureKind> Sync for RecvGuard<K> {}

impl<K: CaptureKind> RecvGuard<K> {
    /// # Safety
    ///
    /// `frame` must have been populated by a capture on `instance` that
    /// returned `K::FRAME_TYPE`, and `slot` must be that receiver's slot.
    pub(crate) unsafe fn new(
        ndi: Ndi,
        slot: Arc<HandleSlot>,
        instance: RawHandle,
        frame: K::RawFrame,
    ) -> Self {
        slot.pin();
        Self {
            ndi,
            slot,
            instance,
            frame,
        }
    }

    pub(crate) fn frame(&self) -> &K::RawFrame {
        &self.frame
    }
}

impl<K: CaptureKind> Drop for RecvGuard<K> {
    fn drop(&mut self) {
        // SAFETY: the pin keeps the receiver alive until after this free.
        unsafe { K::free_frame(self.ndi.inner.api.as_ref(), self.instance.0, &self.frame) };
        self.slot.unpin();
    }
}

/// RAII guard for a captured video frame.
pub(crate) type RecvVideoGuard = RecvGuard<VideoKind>;

/// RAII guard for a captured audio frame.
pub(crate) type RecvAudioGuard = RecvGuard<AudioKind>;

/// RAII guard for a captured metadata frame.
pub(crate) type RecvMetadataGuard = RecvGuard<MetadataKind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_constants() {
        assert_eq!(VideoKind::FRAME_TYPE, 1);
        assert_eq!(AudioKind::FRAME_TYPE, 2);
        assert_eq!(MetadataKind::FRAME_TYPE, 3);
    }

    #[test]
    fn test_guards_are_send() {
        fn assert_send<T: Send + Sync>() {}
        assert_send::<RecvVideoGuard>();
        assert_send::<RecvAudioGuard>();
        assert_send::<RecvMetadataGuard>();
    }
}
