//! Unit tests for the ndi-bridge library.

use std::ffi::CString;

use crate::{
    error::Error,
    finder::{FinderOptions, Source},
    frames::{PixelFormat, VideoFrame},
    ndi_lib::*,
    options::{join_list, split_list, LIST_DELIMITER},
    registry::HandleKind,
};

#[test]
fn test_fourcc_packs_little_endian() {
    // 'U' | 'Y' << 8 | 'V' << 16 | 'Y' << 24
    assert_eq!(make_fourcc(b"UYVY"), 0x5956_5955);
    assert_eq!(NDIlib_FourCC_video_type_BGRA, u32::from_le_bytes(*b"BGRA"));
    assert_eq!(NDIlib_FourCC_audio_type_FLTP, u32::from_le_bytes(*b"FLTp"));
    assert_eq!(PixelFormat::UYVY as u32, NDIlib_FourCC_video_type_UYVY);
    assert_eq!(PixelFormat::try_from(NDIlib_FourCC_video_type_NV12).unwrap(), PixelFormat::NV12);
}

#[test]
fn test_unknown_fourcc_is_not_a_pixel_format() {
    assert!(PixelFormat::try_from(make_fourcc(b"ABCD")).is_err());
    assert!(!PixelFormat::accepts(i64::from(make_fourcc(b"ABCD"))));
    assert!(PixelFormat::accepts(i64::from(NDIlib_FourCC_video_type_RGBX)));
}

#[test]
fn test_video_frame_builder_defaults() {
    let frame = VideoFrame::builder().build().unwrap();
    assert_eq!((frame.width, frame.height), (1920, 1080));
    assert_eq!(frame.pixel_format, PixelFormat::BGRA);
    assert_eq!((frame.frame_rate_n, frame.frame_rate_d), (60, 1));
    assert_eq!(frame.line_stride(), 1920 * 4);
    assert_eq!(frame.data.len(), 1920 * 4 * 1080);
}

#[test]
fn test_video_frame_builder_uyvy() {
    let frame = VideoFrame::builder()
        .resolution(640, 480)
        .pixel_format(PixelFormat::UYVY)
        .frame_rate(30000, 1001)
        .build()
        .unwrap();
    assert_eq!(frame.line_stride(), 640 * 2);
    assert_eq!(frame.required_len(), 640 * 2 * 480);
}

#[test]
fn test_source_matches_host() {
    let source = Source::with_address("CAMERA1 (Chan1)", "192.168.0.107:5960");
    assert!(source.matches_host("192.168.0.107"));
    assert!(source.matches_host("192.168.0"));
    assert!(!source.matches_host("192.168.1"));

    // Test matching by name
    assert!(source.matches_host("CAMERA1"));
    assert!(source.matches_host("Chan1"));
    assert!(!source.matches_host("CAMERA2"));

    let url_source = Source::with_address("Studio Camera", "http://studio.local:8080");
    assert!(url_source.matches_host("studio.local"));
    assert!(url_source.matches_host("Studio"));
    assert!(!url_source.matches_host("other"));

    let local = Source::new("Local Source");
    assert!(local.matches_host("Local"));
    assert!(!local.matches_host("192.168.1.1"));
}

#[test]
fn test_source_host_and_port() {
    let ip = Source::with_address("CAMERA1", "192.168.1.100:5960");
    assert_eq!(ip.host(), Some("192.168.1.100"));
    assert_eq!(ip.port(), Some(5960));

    let no_port = Source::with_address("CAMERA2", "192.168.1.101");
    assert_eq!(no_port.host(), Some("192.168.1.101"));
    assert_eq!(no_port.port(), None);

    let url = Source::with_address("Studio", "http://camera.local:8080/stream");
    assert_eq!(url.host(), Some("camera.local"));
    assert_eq!(url.port(), Some(8080));

    let no_scheme = Source::with_address("Studio3", "camera.local:8080");
    assert_eq!(no_scheme.host(), Some("camera.local"));

    let scheme_only = Source::with_address("Studio4", "http://camera.local/stream");
    assert_eq!(scheme_only.port(), None);

    assert_eq!(Source::new("None").host(), None);
    assert_eq!(Source::new("None").port(), None);
}

#[test]
fn test_source_display() {
    assert_eq!(
        Source::with_address("LAPTOP (Camera 1)", "192.168.1.100:5960").to_string(),
        "LAPTOP (Camera 1)@192.168.1.100:5960"
    );
    assert_eq!(Source::new("LAPTOP (Camera 1)").to_string(), "LAPTOP (Camera 1)");
}

#[test]
fn test_source_raw_descriptor() {
    let source = Source::with_address("CAMERA1 (Chan1)", "192.168.0.107:5960");
    let raw = source.to_raw().unwrap();
    let back = unsafe { Source::from_raw(&raw.raw) };
    assert_eq!(back, source);

    let nameless = Source::new("CAMERA1");
    let raw = nameless.to_raw().unwrap();
    assert!(raw.raw.p_url_address.is_null());
}

#[test]
fn test_source_from_raw_null_and_empty_address() {
    let name = CString::new("CAMERA1").unwrap();
    let empty = CString::new("").unwrap();
    let raw = NDIlib_source_t {
        p_ndi_name: name.as_ptr(),
        p_url_address: empty.as_ptr(),
    };
    let source = unsafe { Source::from_raw(&raw) };
    assert_eq!(source, Source::new("CAMERA1"));

    let raw = NDIlib_source_t {
        p_ndi_name: std::ptr::null(),
        p_url_address: std::ptr::null(),
    };
    assert_eq!(unsafe { Source::from_raw(&raw) }, Source::default());
}

#[test]
fn test_source_with_nul_rejected() {
    let source = Source::new("bad\0name");
    assert!(matches!(source.to_raw(), Err(Error::InvalidCString(_))));
}

#[test]
fn test_finder_builder_joins_lists() {
    let options = FinderOptions::builder()
        .show_local_sources(false)
        .groups(["Public", "Studio"])
        .extra_ips(["10.0.0.1", "10.0.0.2"])
        .build()
        .unwrap();
    assert!(!options.show_local_sources);
    assert_eq!(options.groups.as_deref(), Some("Public,Studio"));
    assert_eq!(options.extra_ips.as_deref(), Some("10.0.0.1,10.0.0.2"));

    let defaults = FinderOptions::builder().build().unwrap();
    assert_eq!(defaults, FinderOptions::default());
}

#[test]
fn test_group_list_round_trip() {
    let joined = join_list("groups", ["A", "B", "C"], LIST_DELIMITER)
        .unwrap()
        .unwrap();
    assert_eq!(joined, "A,B,C");
    assert_eq!(split_list(&joined, LIST_DELIMITER), ["A", "B", "C"]);
}

#[test]
fn test_error_messages() {
    let err = Error::BufferSizeMismatch {
        required: 64,
        actual: 63,
    };
    assert_eq!(
        err.to_string(),
        "Buffer size mismatch: layout requires 64 bytes, buffer holds 63"
    );

    let err = Error::UseAfterFree {
        kind: HandleKind::Receiver,
        id: 3,
    };
    assert_eq!(
        err.to_string(),
        "Use after free: NDI receive handle 3 has already been released"
    );
}
