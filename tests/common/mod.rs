//! A recording stand-in for the NDI runtime.
//!
//! `MockSdk` implements `NdiApi` in plain Rust. Every native call is appended
//! to a log, captures are answered from a scripted queue, and buffers handed
//! out by captures are tracked until the matching free.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ndi_bridge::ndi_lib::*;
use ndi_bridge::{BridgeConfig, Ndi, NdiApi};

static VERSION: &[u8] = b"6.0.0-mock\0";

/// One recorded native call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Initialize,
    Destroy,
    /// `None` when the no-argument path passed NULL settings.
    FindCreate(Option<FindSettings>),
    FindDestroy(usize),
    FindWait { handle: usize, timeout_ms: u32 },
    FindSources(usize),
    RecvCreate(RecvSettings),
    RecvDestroy(usize),
    Capture { handle: usize, timeout_ms: u32 },
    FreeVideo(usize),
    FreeAudio(usize),
    FreeMetadata(usize),
    SendCreate(SendSettings),
    SendDestroy(usize),
    SendVideo(SentVideo),
    SendAudio { handle: usize, channels: i32, samples: i32, stride: i32 },
    SendAudio32f { handle: usize, channels: i32, samples: i32 },
    SendAudio16s { handle: usize, channels: i32, samples: i32, reference_level: i32 },
    SendMetadata { handle: usize, text: String, length: i32 },
    SendConnections { handle: usize, timeout_ms: u32 },
    RoutingCreate { name: Option<String>, groups: Option<String> },
    RoutingDestroy(usize),
    RoutingChange { handle: usize, source: String },
    RoutingClear(usize),
    RoutingConnections { handle: usize, timeout_ms: u32 },
    RoutingSourceName(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FindSettings {
    pub show_local_sources: bool,
    pub groups: Option<String>,
    pub extra_ips: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecvSettings {
    pub source: String,
    pub url_address: Option<String>,
    pub color_format: i32,
    pub bandwidth: i32,
    pub allow_video_fields: bool,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendSettings {
    pub name: String,
    pub groups: Option<String>,
    pub clock_video: bool,
    pub clock_audio: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentVideo {
    pub handle: usize,
    pub width: i32,
    pub height: i32,
    pub fourcc: u32,
    pub stride: i32,
    /// First byte of the row `p_data` points at.
    pub first_byte: u8,
    pub metadata: Option<String>,
}

/// What the next `NDIlib_recv_capture_v3` returns.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Packed 4-byte video; every byte of row `y` is `y`.
    Video { width: i32, height: i32, fourcc: u32 },
    /// Planar float audio; sample `s` of channel `c` is `c * 10 + s`.
    Audio { channels: i32, samples: i32 },
    Metadata(String),
    StatusChange,
    Error,
}

enum Buffer {
    Bytes(Vec<u8>),
    Floats(Vec<f32>),
    Text(CString),
}

// Raw descriptors the mock hands out; they point into the owned strings.
struct SourceTable {
    _strings: Vec<(CString, Option<CString>)>,
    raw: Vec<NDIlib_source_t>,
}

// SAFETY: the raw pointers only reference the strings owned alongside them.
unsafe impl Send for SourceTable {}

impl SourceTable {
    fn new(sources: &[(&str, Option<&str>)]) -> Self {
        let strings: Vec<(CString, Option<CString>)> = sources
            .iter()
            .map(|(name, url)| {
                (
                    CString::new(*name).unwrap(),
                    url.map(|u| CString::new(u).unwrap()),
                )
            })
            .collect();
        let raw = strings
            .iter()
            .map(|(name, url)| NDIlib_source_t {
                p_ndi_name: name.as_ptr(),
                p_url_address: url.as_ref().map_or(ptr::null(), |u| u.as_ptr()),
            })
            .collect();
        Self {
            _strings: strings,
            raw,
        }
    }
}

#[derive(Default)]
pub struct MockSdk {
    calls: Mutex<Vec<Call>>,
    script: Mutex<VecDeque<Scripted>>,
    buffers: Mutex<HashMap<usize, Buffer>>,
    sources: Mutex<Option<SourceTable>>,
    routed: Mutex<HashMap<usize, SourceTable>>,
    next_handle: AtomicUsize,
    fail_init: AtomicBool,
    fail_create: AtomicBool,
    capture_delay_ms: AtomicUsize,
    create_delay_ms: AtomicUsize,
    send_delay_ms: AtomicUsize,
    sends_started: AtomicUsize,
    connections: AtomicI32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockSdk {
    pub fn new() -> Arc<Self> {
        init_tracing();
        Arc::new(Self::default())
    }

    /// A context over a fresh mock with `workers` native worker slots.
    pub fn context(workers: usize) -> (Arc<Self>, Ndi) {
        let mock = Self::new();
        let ndi = Ndi::with_api(
            mock.clone(),
            BridgeConfig::default().worker_threads(workers),
        )
        .unwrap();
        (mock, ndi)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn push_capture(&self, frame: Scripted) {
        self.script.lock().unwrap().push_back(frame);
    }

    pub fn set_sources(&self, sources: &[(&str, Option<&str>)]) {
        *self.sources.lock().unwrap() = Some(SourceTable::new(sources));
    }

    pub fn set_capture_delay(&self, delay: Duration) {
        self.capture_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Delays `NDIlib_send_create` after it has been recorded.
    pub fn set_create_delay(&self, delay: Duration) {
        self.create_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Delays `NDIlib_send_send_video_v2`; the frame is read after the delay.
    pub fn set_send_delay(&self, delay: Duration) {
        self.send_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Video sends that have entered the native layer.
    pub fn sends_started(&self) -> usize {
        self.sends_started.load(Ordering::SeqCst)
    }

    pub fn set_connections(&self, n: i32) {
        self.connections.store(n, Ordering::SeqCst);
    }

    pub fn fail_initialize(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Capture buffers not yet freed.
    pub fn outstanding_buffers(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }

    /// Highest number of captures that were inside the native layer at once.
    pub fn max_concurrent_captures(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn capture_timeouts(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Capture { timeout_ms, .. } => Some(timeout_ms),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| pred(call)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn new_handle(&self) -> *mut c_void {
        if self.fail_create.load(Ordering::SeqCst) {
            return ptr::null_mut();
        }
        // Opaque, never dereferenced.
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        (id * 16) as *mut c_void
    }

    fn store(&self, buffer: Buffer) -> *mut u8 {
        let ptr = match &buffer {
            Buffer::Bytes(bytes) => bytes.as_ptr() as *mut u8,
            Buffer::Floats(floats) => floats.as_ptr() as *mut u8,
            Buffer::Text(text) => text.as_ptr() as *mut u8,
        };
        self.buffers.lock().unwrap().insert(ptr as usize, buffer);
        ptr
    }

    fn release_buffer(&self, ptr: *const u8) {
        let removed = self.buffers.lock().unwrap().remove(&(ptr as usize));
        assert!(removed.is_some(), "freed a buffer the mock never handed out");
    }
}

fn pause(delay_ms: &AtomicUsize) {
    let delay = delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        thread::sleep(Duration::from_millis(delay as u64));
    }
}

fn id(handle: *mut c_void) -> usize {
    handle as usize / 16
}

unsafe fn text(p: *const c_char) -> Option<String> {
    (!p.is_null()).then(|| CStr::from_ptr(p).to_string_lossy().into_owned())
}

impl NdiApi for MockSdk {
    unsafe fn initialize(&self) -> bool {
        self.record(Call::Initialize);
        !self.fail_init.load(Ordering::SeqCst)
    }

    unsafe fn destroy(&self) {
        self.record(Call::Destroy);
    }

    unsafe fn is_supported_cpu(&self) -> bool {
        true
    }

    unsafe fn version(&self) -> *const c_char {
        VERSION.as_ptr().cast()
    }

    unsafe fn find_create_v2(
        &self,
        settings: Option<&NDIlib_find_create_t>,
    ) -> NDIlib_find_instance_t {
        self.record(Call::FindCreate(settings.map(|s| FindSettings {
            show_local_sources: s.show_local_sources,
            groups: text(s.p_groups),
            extra_ips: text(s.p_extra_ips),
        })));
        self.new_handle()
    }

    unsafe fn find_destroy(&self, instance: NDIlib_find_instance_t) {
        self.record(Call::FindDestroy(id(instance)));
    }

    unsafe fn find_wait_for_sources(
        &self,
        instance: NDIlib_find_instance_t,
        timeout_ms: u32,
    ) -> bool {
        self.record(Call::FindWait {
            handle: id(instance),
            timeout_ms,
        });
        self.sources.lock().unwrap().is_some()
    }

    unsafe fn find_get_current_sources(
        &self,
        instance: NDIlib_find_instance_t,
        no_sources: &mut u32,
    ) -> *const NDIlib_source_t {
        self.record(Call::FindSources(id(instance)));
        match &*self.sources.lock().unwrap() {
            Some(table) => {
                *no_sources = table.raw.len() as u32;
                table.raw.as_ptr()
            }
            None => {
                *no_sources = 0;
                ptr::null()
            }
        }
    }

    unsafe fn recv_create_v3(&self, settings: &NDIlib_recv_create_v3_t) -> NDIlib_recv_instance_t {
        self.record(Call::RecvCreate(RecvSettings {
            source: text(settings.source_to_connect_to.p_ndi_name).unwrap_or_default(),
            url_address: text(settings.source_to_connect_to.p_url_address),
            color_format: settings.color_format,
            bandwidth: settings.bandwidth,
            allow_video_fields: settings.allow_video_fields,
            name: text(settings.p_ndi_recv_name),
        }));
        self.new_handle()
    }

    unsafe fn recv_destroy(&self, instance: NDIlib_recv_instance_t) {
        self.record(Call::RecvDestroy(id(instance)));
    }

    unsafe fn recv_capture_v3(
        &self,
        instance: NDIlib_recv_instance_t,
        video: *mut NDIlib_video_frame_v2_t,
        audio: *mut NDIlib_audio_frame_v3_t,
        metadata: *mut NDIlib_metadata_frame_t,
        timeout_ms: u32,
    ) -> NDIlib_frame_type_e {
        self.record(Call::Capture {
            handle: id(instance),
            timeout_ms,
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = self.capture_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay as u64));
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let next = self.script.lock().unwrap().pop_front();
        match next {
            None => NDIlib_frame_type_none,
            Some(Scripted::Video {
                width,
                height,
                fourcc,
            }) if !video.is_null() => {
                let stride = width * 4;
                let bytes: Vec<u8> = (0..height)
                    .flat_map(|y| std::iter::repeat(y as u8).take(stride as usize))
                    .collect();
                let frame = &mut *video;
                frame.xres = width;
                frame.yres = height;
                frame.FourCC = fourcc;
                frame.frame_rate_N = 30;
                frame.frame_rate_D = 1;
                frame.line_stride_or_data_size_in_bytes = stride;
                frame.p_data = self.store(Buffer::Bytes(bytes));
                NDIlib_frame_type_video
            }
            Some(Scripted::Audio { channels, samples }) if !audio.is_null() => {
                let floats: Vec<f32> = (0..channels)
                    .flat_map(|c| (0..samples).map(move |s| (c * 10 + s) as f32))
                    .collect();
                let frame = &mut *audio;
                frame.sample_rate = 48_000;
                frame.no_channels = channels;
                frame.no_samples = samples;
                frame.FourCC = NDIlib_FourCC_audio_type_FLTP;
                frame.channel_stride_or_data_size_in_bytes = samples * 4;
                frame.p_data = self.store(Buffer::Floats(floats));
                NDIlib_frame_type_audio
            }
            Some(Scripted::Metadata(payload)) if !metadata.is_null() => {
                let payload = CString::new(payload).unwrap();
                let frame = &mut *metadata;
                frame.length = payload.as_bytes_with_nul().len() as c_int;
                frame.timecode = 0;
                frame.p_data = self.store(Buffer::Text(payload)).cast();
                NDIlib_frame_type_metadata
            }
            Some(Scripted::StatusChange) => NDIlib_frame_type_status_change,
            Some(Scripted::Error) => NDIlib_frame_type_error,
            // A frame of a kind the caller did not ask for stays queued.
            Some(other) => {
                self.script.lock().unwrap().push_front(other);
                NDIlib_frame_type_none
            }
        }
    }

    unsafe fn recv_free_video_v2(
        &self,
        instance: NDIlib_recv_instance_t,
        frame: &NDIlib_video_frame_v2_t,
    ) {
        self.record(Call::FreeVideo(id(instance)));
        self.release_buffer(frame.p_data as *const u8);
    }

    unsafe fn recv_free_audio_v3(
        &self,
        instance: NDIlib_recv_instance_t,
        frame: &NDIlib_audio_frame_v3_t,
    ) {
        self.record(Call::FreeAudio(id(instance)));
        self.release_buffer(frame.p_data as *const u8);
    }

    unsafe fn recv_free_metadata(
        &self,
        instance: NDIlib_recv_instance_t,
        frame: &NDIlib_metadata_frame_t,
    ) {
        self.record(Call::FreeMetadata(id(instance)));
        self.release_buffer(frame.p_data as *const u8);
    }

    unsafe fn send_create(&self, settings: &NDIlib_send_create_t) -> NDIlib_send_instance_t {
        self.record(Call::SendCreate(SendSettings {
            name: text(settings.p_ndi_name).unwrap_or_default(),
            groups: text(settings.p_groups),
            clock_video: settings.clock_video,
            clock_audio: settings.clock_audio,
        }));
        pause(&self.create_delay_ms);
        self.new_handle()
    }

    unsafe fn send_destroy(&self, instance: NDIlib_send_instance_t) {
        self.record(Call::SendDestroy(id(instance)));
    }

    unsafe fn send_send_video_v2(
        &self,
        instance: NDIlib_send_instance_t,
        frame: &NDIlib_video_frame_v2_t,
    ) {
        self.sends_started.fetch_add(1, Ordering::SeqCst);
        pause(&self.send_delay_ms);
        self.record(Call::SendVideo(SentVideo {
            handle: id(instance),
            width: frame.xres,
            height: frame.yres,
            fourcc: frame.FourCC,
            stride: frame.line_stride_or_data_size_in_bytes,
            first_byte: if frame.p_data.is_null() { 0 } else { *frame.p_data },
            metadata: text(frame.p_metadata),
        }));
    }

    unsafe fn send_send_audio_v3(
        &self,
        instance: NDIlib_send_instance_t,
        frame: &NDIlib_audio_frame_v3_t,
    ) {
        self.record(Call::SendAudio {
            handle: id(instance),
            channels: frame.no_channels,
            samples: frame.no_samples,
            stride: frame.channel_stride_or_data_size_in_bytes,
        });
    }

    unsafe fn util_send_send_audio_interleaved_32f(
        &self,
        instance: NDIlib_send_instance_t,
        frame: &NDIlib_audio_frame_interleaved_32f_t,
    ) {
        self.record(Call::SendAudio32f {
            handle: id(instance),
            channels: frame.no_channels,
            samples: frame.no_samples,
        });
    }

    unsafe fn util_send_send_audio_interleaved_16s(
        &self,
        instance: NDIlib_send_instance_t,
        frame: &NDIlib_audio_frame_interleaved_16s_t,
    ) {
        self.record(Call::SendAudio16s {
            handle: id(instance),
            channels: frame.no_channels,
            samples: frame.no_samples,
            reference_level: frame.reference_level,
        });
    }

    unsafe fn send_send_metadata(
        &self,
        instance: NDIlib_send_instance_t,
        frame: &NDIlib_metadata_frame_t,
    ) {
        self.record(Call::SendMetadata {
            handle: id(instance),
            text: text(frame.p_data).unwrap_or_default(),
            length: frame.length,
        });
    }

    unsafe fn send_get_no_connections(
        &self,
        instance: NDIlib_send_instance_t,
        timeout_ms: u32,
    ) -> c_int {
        self.record(Call::SendConnections {
            handle: id(instance),
            timeout_ms,
        });
        self.connections.load(Ordering::SeqCst)
    }

    unsafe fn routing_create(
        &self,
        settings: &NDIlib_routing_create_t,
    ) -> NDIlib_routing_instance_t {
        let name = text(settings.p_ndi_name);
        self.record(Call::RoutingCreate {
            name: name.clone(),
            groups: text(settings.p_groups),
        });
        let handle = self.new_handle();
        if !handle.is_null() {
            let announced = format!("MOCK ({})", name.as_deref().unwrap_or("Routing"));
            self.routed
                .lock()
                .unwrap()
                .insert(id(handle), SourceTable::new(&[(announced.as_str(), None)]));
        }
        handle
    }

    unsafe fn routing_destroy(&self, instance: NDIlib_routing_instance_t) {
        self.record(Call::RoutingDestroy(id(instance)));
        self.routed.lock().unwrap().remove(&id(instance));
    }

    unsafe fn routing_change(
        &self,
        instance: NDIlib_routing_instance_t,
        source: &NDIlib_source_t,
    ) -> bool {
        self.record(Call::RoutingChange {
            handle: id(instance),
            source: text(source.p_ndi_name).unwrap_or_default(),
        });
        true
    }

    unsafe fn routing_clear(&self, instance: NDIlib_routing_instance_t) -> bool {
        self.record(Call::RoutingClear(id(instance)));
        true
    }

    unsafe fn routing_get_no_connections(
        &self,
        instance: NDIlib_routing_instance_t,
        timeout_ms: u32,
    ) -> c_int {
        self.record(Call::RoutingConnections {
            handle: id(instance),
            timeout_ms,
        });
        self.connections.load(Ordering::SeqCst)
    }

    unsafe fn routing_get_source_name(
        &self,
        instance: NDIlib_routing_instance_t,
    ) -> *const NDIlib_source_t {
        self.record(Call::RoutingSourceName(id(instance)));
        self.routed
            .lock()
            .unwrap()
            .get(&id(instance))
            .map_or(ptr::null(), |table| table.raw.as_ptr())
    }
}

/// Routes the crate's logs to the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Polls `cond` until it holds or a second has passed.
pub async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached within a second");
}
