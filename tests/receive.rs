mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{wait_until, Call, MockSdk, RecvSettings, Scripted};
use ndi_bridge::ndi_lib::*;
use ndi_bridge::{
    Bandwidth, ColorFormat, Error, Frame, Ndi, PixelFormat, Receiver, ReceiverOptions, Source,
};
use serde_json::json;

async fn receiver(ndi: &Ndi) -> Receiver {
    let options = ReceiverOptions::builder(Source::with_address("HOST (Cam)", "10.0.0.5:5961"))
        .name("Monitor")
        .build();
    ndi.receiver(&options).await.unwrap()
}

#[tokio::test]
async fn test_create_settings() {
    let (mock, ndi) = MockSdk::context(2);
    let options = ReceiverOptions::builder(Source::new("HOST (Cam)"))
        .color(ColorFormat::UYVY_RGBA)
        .bandwidth(Bandwidth::Lowest)
        .allow_video_fields(false)
        .build();
    ndi.receiver(&options).await.unwrap();

    assert!(mock.calls().contains(&Call::RecvCreate(RecvSettings {
        source: "HOST (Cam)".into(),
        url_address: None,
        color_format: NDIlib_recv_color_format_UYVY_RGBA,
        bandwidth: NDIlib_recv_bandwidth_lowest,
        allow_video_fields: false,
        name: None,
    })));
}

#[tokio::test]
async fn test_create_from_option_bag() {
    let (mock, ndi) = MockSdk::context(2);
    Receiver::from_value(
        &ndi,
        &json!({
            "source": { "name": "HOST (Cam)", "urlAddress": "10.0.0.5:5961" },
            "bandwidth": NDIlib_recv_bandwidth_audio_only,
            "name": "Recorder",
        }),
    )
    .await
    .unwrap();

    assert!(mock.calls().contains(&Call::RecvCreate(RecvSettings {
        source: "HOST (Cam)".into(),
        url_address: Some("10.0.0.5:5961".into()),
        color_format: NDIlib_recv_color_format_BGRX_BGRA,
        bandwidth: NDIlib_recv_bandwidth_audio_only,
        allow_video_fields: true,
        name: Some("Recorder".into()),
    })));
}

#[tokio::test]
async fn test_bad_color_format_makes_no_native_call() {
    let (mock, ndi) = MockSdk::context(2);
    let err = Receiver::from_value(&ndi, &json!({ "source": "HOST (Cam)", "colorFormat": 7 }))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOption { ref key, .. } if key == "colorFormat"));
    assert_eq!(mock.count(|c| matches!(c, Call::RecvCreate(_))), 0);
}

#[tokio::test]
async fn test_capture_timeout_is_none() {
    let (mock, ndi) = MockSdk::context(2);
    let receiver = receiver(&ndi).await;
    assert!(receiver.capture(0).await.unwrap().is_none());
    assert!(receiver.capture_video(0).await.unwrap().is_none());
    assert_eq!(mock.capture_timeouts(), vec![0, 0]);
}

#[tokio::test]
async fn test_video_frame_borrows_native_buffer() {
    let (mock, ndi) = MockSdk::context(2);
    let receiver = receiver(&ndi).await;
    mock.push_capture(Scripted::Video {
        width: 4,
        height: 3,
        fourcc: NDIlib_FourCC_video_type_BGRA,
    });

    let Some(Frame::Video(frame)) = receiver.capture(100).await.unwrap() else {
        panic!("expected a video frame");
    };
    assert_eq!((frame.width(), frame.height()), (4, 3));
    assert_eq!(frame.pixel_format(), PixelFormat::BGRA);
    assert_eq!(frame.line_stride(), 16);
    assert_eq!(frame.data().len(), 48);
    assert_eq!(frame.line(2).unwrap(), &[2u8; 16][..]);
    assert!(frame.line(3).is_none());
    assert_eq!(receiver.outstanding_frames(), 1);

    let owned = frame.to_owned();
    assert_eq!(owned.data.len(), 48);

    frame.free();
    assert_eq!(receiver.outstanding_frames(), 0);
    assert_eq!(mock.outstanding_buffers(), 0);
    assert_eq!(mock.count(|c| *c == Call::FreeVideo(1)), 1);
}

#[tokio::test]
async fn test_audio_frame_channels() {
    let (mock, ndi) = MockSdk::context(2);
    let receiver = receiver(&ndi).await;
    mock.push_capture(Scripted::Audio {
        channels: 2,
        samples: 4,
    });

    let frame = receiver.capture_audio(100).await.unwrap().unwrap();
    assert_eq!(frame.num_channels(), 2);
    assert_eq!(frame.num_samples(), 4);
    assert_eq!(frame.channel(1).unwrap(), &[10.0f32, 11.0, 12.0, 13.0]);
    assert!(frame.channel(2).is_none());

    drop(frame);
    assert_eq!(mock.count(|c| *c == Call::FreeAudio(1)), 1);
    assert_eq!(mock.outstanding_buffers(), 0);
}

#[tokio::test]
async fn test_metadata_frame_text() {
    let (mock, ndi) = MockSdk::context(2);
    let receiver = receiver(&ndi).await;
    mock.push_capture(Scripted::Metadata("<ndi_tally on_program=\"true\"/>".into()));

    let Some(Frame::Metadata(frame)) = receiver.capture(100).await.unwrap() else {
        panic!("expected a metadata frame");
    };
    assert_eq!(frame.text(), "<ndi_tally on_program=\"true\"/>");
    assert_eq!(frame.to_owned().data, "<ndi_tally on_program=\"true\"/>");
    drop(frame);
    assert_eq!(mock.outstanding_buffers(), 0);
}

#[tokio::test]
async fn test_status_change_and_error_frames() {
    let (mock, ndi) = MockSdk::context(2);
    let receiver = receiver(&ndi).await;
    mock.push_capture(Scripted::StatusChange);
    mock.push_capture(Scripted::Error);

    assert!(matches!(
        receiver.capture(0).await.unwrap(),
        Some(Frame::StatusChange)
    ));
    assert!(matches!(
        receiver.capture(0).await,
        Err(Error::NativeCallError { .. })
    ));
}

#[tokio::test]
async fn test_single_kind_capture_leaves_other_frames_queued() {
    let (mock, ndi) = MockSdk::context(2);
    let receiver = receiver(&ndi).await;
    mock.push_capture(Scripted::Audio {
        channels: 1,
        samples: 8,
    });

    assert!(receiver.capture_video(0).await.unwrap().is_none());
    let Some(Frame::Audio(frame)) = receiver.capture(0).await.unwrap() else {
        panic!("expected the queued audio frame");
    };
    assert_eq!(frame.data().len(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_captures_on_one_receiver_are_serialized_in_order() {
    let (mock, ndi) = MockSdk::context(4);
    let receiver = receiver(&ndi).await;
    mock.set_capture_delay(Duration::from_millis(20));

    let (a, b, c) = tokio::join!(
        receiver.capture(1),
        receiver.capture(2),
        receiver.capture(3)
    );
    assert!(a.unwrap().is_none() && b.unwrap().is_none() && c.unwrap().is_none());

    assert_eq!(mock.capture_timeouts(), vec![1, 2, 3]);
    assert_eq!(mock.max_concurrent_captures(), 1);
}

async fn capture_texts(receiver: &Receiver, n: usize) -> Vec<String> {
    let mut texts = Vec::new();
    for _ in 0..n {
        match receiver.capture(100).await.unwrap() {
            Some(Frame::Metadata(frame)) => texts.push(frame.text().to_string()),
            other => panic!("expected a metadata frame, got {other:?}"),
        }
    }
    texts
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_captures_deliver_each_frame_once() {
    let (mock, ndi) = MockSdk::context(4);
    let receiver = Arc::new(receiver(&ndi).await);
    for i in 0..6 {
        mock.push_capture(Scripted::Metadata(format!("frame {i}")));
    }

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let receiver = Arc::clone(&receiver);
            tokio::spawn(async move { capture_texts(&receiver, 3).await })
        })
        .collect();
    let mut delivered = Vec::new();
    for task in tasks {
        let texts = task.await.unwrap();
        // Each task sees its own captures in submission order.
        let mut sorted = texts.clone();
        sorted.sort();
        assert_eq!(texts, sorted);
        delivered.extend(texts);
    }

    delivered.sort();
    let expected: Vec<String> = (0..6).map(|i| format!("frame {i}")).collect();
    assert_eq!(delivered, expected);
    assert_eq!(mock.count(|c| matches!(c, Call::Capture { .. })), 6);
    assert_eq!(mock.count(|c| matches!(c, Call::FreeMetadata(_))), 6);
    assert_eq!(mock.outstanding_buffers(), 0);
    assert_eq!(receiver.outstanding_frames(), 0);
}

#[tokio::test]
async fn test_queued_captures_take_frames_in_order() {
    let (mock, ndi) = MockSdk::context(4);
    let receiver = receiver(&ndi).await;
    for i in 0..3 {
        mock.push_capture(Scripted::Metadata(format!("frame {i}")));
    }

    let (a, b, c) = tokio::join!(
        receiver.capture_metadata(100),
        receiver.capture_metadata(100),
        receiver.capture_metadata(100)
    );
    let texts: Vec<String> = [a, b, c]
        .into_iter()
        .map(|frame| frame.unwrap().unwrap().text().to_string())
        .collect();
    assert_eq!(texts, ["frame 0", "frame 1", "frame 2"]);
    assert_eq!(mock.count(|c| matches!(c, Call::FreeMetadata(_))), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_captures_on_different_receivers_overlap() {
    let (mock, ndi) = MockSdk::context(4);
    let first = receiver(&ndi).await;
    let second = receiver(&ndi).await;
    mock.set_capture_delay(Duration::from_millis(100));

    let (a, b) = tokio::join!(first.capture(1), second.capture(2));
    a.unwrap();
    b.unwrap();
    assert_eq!(mock.max_concurrent_captures(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_limit_bounds_native_calls() {
    let (mock, ndi) = MockSdk::context(1);
    let first = receiver(&ndi).await;
    let second = receiver(&ndi).await;
    mock.set_capture_delay(Duration::from_millis(20));

    let (a, b) = tokio::join!(first.capture(1), second.capture(2));
    a.unwrap();
    b.unwrap();
    assert_eq!(mock.max_concurrent_captures(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_capture_never_reaches_native() {
    let (mock, ndi) = MockSdk::context(2);
    let receiver = Arc::new(receiver(&ndi).await);
    mock.set_capture_delay(Duration::from_millis(200));

    let busy = {
        let receiver = Arc::clone(&receiver);
        tokio::spawn(async move { receiver.capture(1).await })
    };
    wait_until(|| mock.capture_timeouts().len() == 1).await;
    assert!(receiver.is_busy());

    // Queued behind the running capture, then abandoned.
    let queued = tokio::time::timeout(Duration::from_millis(20), receiver.capture(2)).await;
    assert!(queued.is_err());

    assert!(busy.await.unwrap().unwrap().is_none());
    mock.set_capture_delay(Duration::ZERO);
    receiver.capture(3).await.unwrap();
    assert_eq!(mock.capture_timeouts(), vec![1, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_release_waits_for_running_capture() {
    let (mock, ndi) = MockSdk::context(2);
    let receiver = Arc::new(receiver(&ndi).await);
    mock.set_capture_delay(Duration::from_millis(50));

    let busy = {
        let receiver = Arc::clone(&receiver);
        tokio::spawn(async move { receiver.capture(1).await })
    };
    wait_until(|| mock.capture_timeouts().len() == 1).await;
    receiver.release().await.unwrap();

    assert!(busy.await.unwrap().is_ok());
    let calls = mock.calls();
    let capture = calls.iter().position(|c| matches!(c, Call::Capture { .. }));
    let destroy = calls.iter().position(|c| matches!(c, Call::RecvDestroy(_)));
    assert!(capture < destroy);
    assert!(matches!(
        receiver.capture(0).await,
        Err(Error::UseAfterFree { .. })
    ));
}
