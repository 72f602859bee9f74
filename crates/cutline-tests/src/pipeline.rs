//! End-to-end pipeline tests: indexing feeding a backend, conform deferral
//! and resume, and cache lifecycle across parameter changes.

use cutline_core::{
    AudioParams, ChannelLayout, FrameRate, RationalTime, SampleFormat, StreamDescriptor,
    StreamKind, TimeRange, Timebase, VideoParams,
};
use cutline_index::{FrameIndex, IndexSource, Indexer};
use cutline_render::{
    ArtifactId, AudioRenderBackend, AudioSource, BackendCommon, ConformCoordinator,
    ConformDispatcher, ConformKey, DecodeWorker, GraphNode, RenderJob, RenderResponse,
    RenderWorkerPool, VideoRenderBackend, VideoSource, ViewerOutput,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct SequenceDecoder {
    next: AtomicU64,
}

impl DecodeWorker for SequenceDecoder {
    fn render(&self, _job: &RenderJob) -> cutline_core::Result<ArtifactId> {
        Ok(ArtifactId(self.next.fetch_add(1, Ordering::SeqCst)))
    }
}

struct NullConform(AtomicUsize);

impl ConformDispatcher for NullConform {
    fn dispatch(&self, _key: &ConformKey) -> cutline_core::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct VecSource(Vec<i64>, usize);

impl IndexSource for VecSource {
    fn next_timestamp(&mut self) -> cutline_core::Result<Option<i64>> {
        let ts = self.0.get(self.1).copied();
        self.1 += 1;
        Ok(ts)
    }
}

fn viewer() -> ViewerOutput {
    ViewerOutput {
        duration: RationalTime::new(60, 1),
        nodes: vec![GraphNode {
            id: Uuid::new_v4(),
            kind: "output".into(),
            time_shift: RationalTime::ZERO,
        }],
    }
}

fn seconds(start: i64, end: i64) -> TimeRange {
    TimeRange::from_start_end(RationalTime::new(start, 1), RationalTime::new(end, 1))
}

fn audio_params() -> AudioParams {
    AudioParams::new(48000, ChannelLayout::Stereo, SampleFormat::F32)
}

fn poll_until_valid(backend: &BackendCommon, range: TimeRange) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        backend.poll_completions();
        if backend.cache().lock().is_valid(range) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn indexed_stream_renders_and_caches() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor =
        StreamDescriptor::new("/media/clip.mov", 0, StreamKind::Video, Timebase::new(1, 1000));

    // Build the index on the background pass
    let index = Arc::new(FrameIndex::new(descriptor.timebase, 0));
    let timestamps: Vec<i64> = (0..100).map(|i| i * 1001).collect();
    Indexer::open(
        Arc::clone(&index),
        &descriptor,
        dir.path(),
        Box::new(VecSource(timestamps, 0)),
    )
    .unwrap()
    .unwrap()
    .join()
    .unwrap();

    let pool = RenderWorkerPool::new(2, Arc::new(SequenceDecoder { next: AtomicU64::new(1) })).unwrap();
    let mut backend = VideoRenderBackend::new(BackendCommon::new(pool));
    backend.common_mut().connect_viewer(viewer());
    backend.common_mut().compile().unwrap();
    backend
        .set_params(VideoParams::new(1280, 720, FrameRate::FPS_24))
        .unwrap();

    let source = VideoSource {
        descriptor,
        index,
    };

    let range = seconds(1, 2);
    assert!(matches!(
        backend.render(range, &source),
        RenderResponse::Dispatched
    ));
    assert!(poll_until_valid(backend.common(), range));

    // Second request over the same range is a cache hit
    match backend.render(range, &source) {
        RenderResponse::Cached(artifacts) => assert!(!artifacts.is_empty()),
        other => panic!("expected cache hit, got {other:?}"),
    }
}

#[test]
fn conform_defers_then_resumes_render() {
    let descriptor =
        StreamDescriptor::new("/media/song.flac", 0, StreamKind::Audio, Timebase::new(1, 44100));
    let index = Arc::new(FrameIndex::new(descriptor.timebase, 0));
    index.append(0);
    index.append(44100);
    index.append_end_marker();

    let source = AudioSource {
        descriptor,
        native_params: AudioParams::new(44100, ChannelLayout::Stereo, SampleFormat::S16),
        index,
    };

    let pool = RenderWorkerPool::new(2, Arc::new(SequenceDecoder { next: AtomicU64::new(1) })).unwrap();
    let coordinator = Arc::new(ConformCoordinator::new());
    let conform = Arc::new(NullConform(AtomicUsize::new(0)));
    let mut backend = AudioRenderBackend::new(
        BackendCommon::new(pool),
        Arc::clone(&coordinator),
        Arc::clone(&conform) as Arc<dyn ConformDispatcher>,
    );
    backend.common_mut().connect_viewer(viewer());
    backend.common_mut().compile().unwrap();
    backend.set_params(audio_params()).unwrap();

    // Mismatched native format: both requests defer, one conform job runs
    assert!(matches!(
        backend.render(seconds(0, 1), &source),
        RenderResponse::WaitingForConform
    ));
    assert!(matches!(
        backend.render(seconds(1, 2), &source),
        RenderResponse::WaitingForConform
    ));
    assert_eq!(conform.0.load(Ordering::SeqCst), 1);

    // Conform worker reports completion; both deferred renders resume
    let key = ConformKey {
        stream: source.descriptor.id,
        params: audio_params(),
    };
    assert_eq!(backend.on_conform_ready(&key).unwrap(), 2);
    assert!(poll_until_valid(backend.common(), seconds(0, 2)));

    // The conformed resource stays available: a fresh request for the same
    // key dispatches without new conform work
    assert!(matches!(
        backend.render(seconds(5, 6), &source),
        RenderResponse::Dispatched
    ));
    assert_eq!(conform.0.load(Ordering::SeqCst), 1);
}

#[test]
fn parameter_change_requires_stop_and_clears_cache() {
    let pool = RenderWorkerPool::new(1, Arc::new(SequenceDecoder { next: AtomicU64::new(1) })).unwrap();
    let coordinator = Arc::new(ConformCoordinator::new());
    let conform = Arc::new(NullConform(AtomicUsize::new(0)));
    let mut backend = AudioRenderBackend::new(
        BackendCommon::new(pool),
        coordinator,
        conform as Arc<dyn ConformDispatcher>,
    );
    backend.common_mut().connect_viewer(viewer());
    backend.common_mut().compile().unwrap();
    backend.set_params(audio_params()).unwrap();

    backend
        .common()
        .cache()
        .lock()
        .mark_valid(seconds(0, 4), Some(ArtifactId(1)));

    // Queue a range, then try to change parameters while running
    backend.common().enqueue(seconds(4, 5));
    let attempt = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        backend.set_params(AudioParams::new(
            96000,
            ChannelLayout::Stereo,
            SampleFormat::F32,
        ))
    }));
    match attempt {
        Ok(Ok(())) => panic!("set_params must fail while the queue is non-empty"),
        Ok(Err(_)) | Err(_) => {}
    }

    // Stop, then the change goes through and drops the cache
    backend.common().pop_next_frame_from_queue();
    backend.stop();
    backend
        .set_params(AudioParams::new(
            96000,
            ChannelLayout::Stereo,
            SampleFormat::F32,
        ))
        .unwrap();
    assert!(!backend.common().cache().lock().is_valid(seconds(0, 4)));
}

#[test]
fn invalidation_reaches_subscribers_and_requeues() {
    let pool = RenderWorkerPool::new(1, Arc::new(SequenceDecoder { next: AtomicU64::new(1) })).unwrap();
    let mut backend = VideoRenderBackend::new(BackendCommon::new(pool));
    backend.common_mut().connect_viewer(viewer());
    backend.common_mut().compile().unwrap();
    backend
        .set_params(VideoParams::new(1280, 720, FrameRate::FPS_24))
        .unwrap();

    let notified = Arc::new(AtomicUsize::new(0));
    let n = Arc::clone(&notified);
    backend.common().events().subscribe(move |event| {
        if matches!(event, cutline_core::BackendEvent::CacheInvalidated(_)) {
            n.fetch_add(1, Ordering::SeqCst);
        }
    });

    backend.common().cache().lock().mark_valid(seconds(0, 10), None);
    backend.invalidate_cache(RationalTime::new(2, 1), RationalTime::new(3, 1));

    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert!(!backend.common().cache().lock().is_valid(seconds(2, 3)));
    assert_eq!(backend.common().pop_next_frame_from_queue(), Some(seconds(2, 3)));
}
