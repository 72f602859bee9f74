//! Render backend orchestration.
//!
//! A backend connects to a viewer (the timeline output), compiles its node
//! graph into a render-thread-safe copy, and services render requests
//! against the cache, the frame index and the worker pool. The media
//! specializations in [`crate::audio`] and [`crate::video`] own the
//! parameter tuple and the media-specific dispatch rules; everything they
//! share lives in [`BackendCommon`].
//!
//! Rendering parameters are immutable while the backend is running: the
//! owning thread may only replace them once the queue is empty and no worker
//! is active.

use crate::cache::{ArtifactId, RenderCache};
use crate::worker::{RenderJob, RenderOutcome, RenderWorkerPool, Submission};
use cutline_core::{BackendEvent, CutlineError, RationalTime, SignalHub, TimeRange};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// One evaluable node in the render graph. The editing layer owns the real
/// node model; backends only see this render-thread-safe copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Stable node id
    pub id: Uuid,
    /// Node type name
    pub kind: String,
    /// Largest timing shift this node can introduce downstream. Drives
    /// conservative widening of invalidated ranges.
    pub time_shift: RationalTime,
}

/// Snapshot of the timeline output a backend renders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerOutput {
    /// Total timeline duration
    pub duration: RationalTime,
    /// Node graph feeding the output
    pub nodes: Vec<GraphNode>,
}

/// Why a render request was rejected without being queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderRejection {
    /// No viewer is connected.
    NoViewer,
    /// The graph has not been compiled.
    NotCompiled,
    /// No valid rendering parameters are set.
    NoParams,
    /// The worker pool or conform worker could not accept the request.
    WorkersUnavailable,
}

/// Non-blocking response to a render request.
#[derive(Debug)]
pub enum RenderResponse {
    /// The whole range was already valid; artifact handles in time order.
    Cached(Vec<ArtifactId>),
    /// Work was handed to the render workers; completion arrives via
    /// [`BackendCommon::poll_completions`].
    Dispatched,
    /// The request is deferred until a conform job finishes.
    WaitingForConform,
    /// The frame index has not reached this range yet; retry after the next
    /// index-changed notification.
    WaitingForIndex,
    /// The request cannot be serviced at all right now.
    Rejected(RenderRejection),
}

/// State shared by the audio and video backend specializations.
pub struct BackendCommon {
    viewer: Option<ViewerOutput>,
    copy_map: HashMap<Uuid, GraphNode>,
    compiled: bool,
    cache: Mutex<RenderCache>,
    queue: Mutex<Vec<TimeRange>>,
    pool: RenderWorkerPool,
    events: SignalHub<BackendEvent>,
}

impl BackendCommon {
    /// Create a backend around a worker pool.
    pub fn new(pool: RenderWorkerPool) -> Self {
        Self {
            viewer: None,
            copy_map: HashMap::new(),
            compiled: false,
            cache: Mutex::new(RenderCache::new()),
            queue: Mutex::new(Vec::new()),
            pool,
            events: SignalHub::new(),
        }
    }

    /// Hub publishing parameter and cache-invalidation events.
    pub fn events(&self) -> &SignalHub<BackendEvent> {
        &self.events
    }

    /// Attach the timeline output this backend renders.
    pub fn connect_viewer(&mut self, viewer: ViewerOutput) {
        info!(nodes = viewer.nodes.len(), "viewer connected");
        self.viewer = Some(viewer);
    }

    /// Detach the viewer, decompiling any compiled graph.
    pub fn disconnect_viewer(&mut self) {
        self.decompile();
        self.viewer = None;
    }

    /// True if a viewer is attached.
    pub fn has_viewer(&self) -> bool {
        self.viewer.is_some()
    }

    /// The attached viewer, if any.
    pub fn viewer(&self) -> Option<&ViewerOutput> {
        self.viewer.as_ref()
    }

    /// Clone the viewer's node graph into the render-thread-safe copy map.
    pub fn compile(&mut self) -> cutline_core::Result<()> {
        let viewer = self
            .viewer
            .as_ref()
            .ok_or_else(|| CutlineError::Render("cannot compile without a viewer".into()))?;

        self.copy_map = viewer
            .nodes
            .iter()
            .map(|n| (n.id, n.clone()))
            .collect();
        self.compiled = true;
        debug!(nodes = self.copy_map.len(), "graph compiled");
        Ok(())
    }

    /// Discard the compiled copy map.
    pub fn decompile(&mut self) {
        self.copy_map.clear();
        self.compiled = false;
    }

    /// True once [`compile`] has run against the current viewer.
    ///
    /// [`compile`]: BackendCommon::compile
    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Content hash identifying the compiled graph plus `params_bytes`.
    /// Keys on-disk cache artifacts: same graph and parameters, same id.
    pub fn cache_id(&self, params_bytes: &[u8]) -> cutline_core::Result<String> {
        if !self.compiled {
            return Err(CutlineError::Render(
                "cache id requires a compiled graph".into(),
            ));
        }

        let mut nodes: Vec<&GraphNode> = self.copy_map.values().collect();
        nodes.sort_by_key(|n| n.id);

        let mut hasher = Sha256::new();
        for node in nodes {
            let bytes = serde_json::to_vec(node)
                .map_err(|e| CutlineError::Internal(format!("graph serialization: {e}")))?;
            hasher.update(&bytes);
        }
        hasher.update(params_bytes);

        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Largest downstream timing shift any compiled node can introduce.
    pub fn max_time_shift(&self) -> RationalTime {
        self.copy_map
            .values()
            .map(|n| n.time_shift)
            .max()
            .unwrap_or(RationalTime::ZERO)
    }

    /// Queue a range for rendering. Exact duplicates of a still-pending
    /// range are dropped.
    pub fn enqueue(&self, range: TimeRange) {
        let mut queue = self.queue.lock();
        if !queue.contains(&range) {
            queue.push(range);
        }
    }

    /// Take the next pending range off the queue. A popped range is not
    /// eligible again until a fresh invalidation re-enqueues it, so multiple
    /// workers can drain one queue without duplicate work.
    pub fn pop_next_frame_from_queue(&self) -> Option<TimeRange> {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }

    /// Number of pending queue entries.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Pop every pending range and submit it to the pool, building each job
    /// through `make_job`. Returns the number dispatched.
    ///
    /// Never blocks: if the pool's job channel fills, the remaining ranges
    /// stay on the queue and the next dispatch pass picks them up.
    pub fn dispatch_pending(
        &self,
        mut make_job: impl FnMut(TimeRange) -> RenderJob,
    ) -> cutline_core::Result<usize> {
        let mut dispatched = 0;
        while let Some(range) = self.pop_next_frame_from_queue() {
            match self.pool.submit(make_job(range))? {
                Submission::Accepted => dispatched += 1,
                Submission::Saturated(job) => {
                    self.queue.lock().insert(0, job.range);
                    debug!(range = ?job.range, "worker channel full, range left queued");
                    break;
                }
            }
        }
        Ok(dispatched)
    }

    /// Collect finished jobs, marking successful ranges valid in the cache.
    /// Failed outcomes are returned untouched for the caller to surface.
    pub fn poll_completions(&self) -> Vec<RenderOutcome> {
        let outcomes = self.pool.poll_completions();

        let mut cache = self.cache.lock();
        for outcome in &outcomes {
            if let Ok(artifact) = &outcome.result {
                cache.mark_valid(outcome.range, Some(*artifact));
            }
        }

        outcomes
    }

    /// Shared render cache.
    pub fn cache(&self) -> &Mutex<RenderCache> {
        &self.cache
    }

    /// Invalidate `range` widened by `widen` on each side (the
    /// backend-specific downstream-affected allowance), re-enqueue it and
    /// notify listeners.
    pub fn invalidate_cache_internal(&self, range: TimeRange, widen: RationalTime) {
        let start = (range.start - widen).max(RationalTime::ZERO);
        let widened = TimeRange::from_start_end(start, range.end() + widen);

        self.cache.lock().invalidate(widened);
        self.enqueue(widened);
        self.events.emit(&BackendEvent::CacheInvalidated(widened));
    }

    /// Drop cached and queued work at or past `beyond` (timeline
    /// shortening).
    pub fn truncate_cache(&self, beyond: RationalTime) {
        let tail_end = {
            let cache = self.cache.lock();
            cache.latest_end().unwrap_or(beyond).max(beyond)
        };

        {
            let mut queue = self.queue.lock();
            queue.retain(|r| r.start < beyond);
            for r in queue.iter_mut() {
                if r.end() > beyond {
                    *r = TimeRange::from_start_end(r.start, beyond);
                }
            }
        }

        if tail_end > beyond {
            let trailing = TimeRange::from_start_end(beyond, tail_end);
            self.cache.lock().invalidate(trailing);
            self.events.emit(&BackendEvent::CacheInvalidated(trailing));
        }
    }

    /// True when no queue entry is pending and no worker is active. This is
    /// the precondition for replacing rendering parameters.
    pub fn is_stopped(&self) -> bool {
        self.queue.lock().is_empty() && self.pool.is_idle()
    }

    /// Drain the queue and wait out in-flight workers. Outcomes from
    /// abandoned jobs are discarded rather than cached, since the caller is
    /// about to change state they were rendered against.
    pub fn stop(&self) {
        self.queue.lock().clear();
        let abandoned = self.pool.wait_idle(Duration::from_secs(10));
        if !abandoned.is_empty() {
            debug!(jobs = abandoned.len(), "discarded in-flight renders on stop");
        }
    }

    /// Emit a parameters-changed notification.
    pub fn notify_params_changed(&self) {
        self.events.emit(&BackendEvent::ParamsChanged);
    }

    /// The worker pool.
    pub fn pool(&self) -> &RenderWorkerPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::DecodeWorker;
    use std::sync::Arc;

    struct NullDecoder;

    impl DecodeWorker for NullDecoder {
        fn render(&self, _job: &RenderJob) -> cutline_core::Result<ArtifactId> {
            Ok(ArtifactId(7))
        }
    }

    fn common() -> BackendCommon {
        BackendCommon::new(RenderWorkerPool::new(2, Arc::new(NullDecoder)).unwrap())
    }

    fn viewer(nodes: Vec<GraphNode>) -> ViewerOutput {
        ViewerOutput {
            duration: RationalTime::new(60, 1),
            nodes,
        }
    }

    fn node(kind: &str, shift_num: i64) -> GraphNode {
        GraphNode {
            id: Uuid::new_v4(),
            kind: kind.to_string(),
            time_shift: RationalTime::new(shift_num, 1),
        }
    }

    fn range(start: i64, end: i64) -> TimeRange {
        TimeRange::from_start_end(RationalTime::new(start, 1), RationalTime::new(end, 1))
    }

    #[test]
    fn test_compile_requires_viewer() {
        let mut backend = common();
        assert!(backend.compile().is_err());

        backend.connect_viewer(viewer(vec![node("gain", 0)]));
        backend.compile().unwrap();
        assert!(backend.is_compiled());

        backend.disconnect_viewer();
        assert!(!backend.is_compiled());
        assert!(!backend.has_viewer());
    }

    #[test]
    fn test_cache_id_stable_for_same_graph_and_params() {
        let mut backend = common();
        let n = node("transform", 0);
        backend.connect_viewer(viewer(vec![n.clone()]));
        backend.compile().unwrap();

        let a = backend.cache_id(b"48000/stereo/f32").unwrap();
        let b = backend.cache_id(b"48000/stereo/f32").unwrap();
        assert_eq!(a, b);

        let c = backend.cache_id(b"44100/stereo/f32").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_queue_pop_is_exclusive() {
        let backend = common();
        backend.enqueue(range(0, 1));
        backend.enqueue(range(1, 2));
        backend.enqueue(range(0, 1)); // duplicate, dropped

        assert_eq!(backend.queue_len(), 2);
        assert_eq!(backend.pop_next_frame_from_queue(), Some(range(0, 1)));
        assert_eq!(backend.pop_next_frame_from_queue(), Some(range(1, 2)));
        assert_eq!(backend.pop_next_frame_from_queue(), None);
    }

    #[test]
    fn test_invalidate_widens_and_reenqueues() {
        let backend = common();
        backend.cache().lock().mark_valid(range(0, 10), None);

        backend.invalidate_cache_internal(range(4, 6), RationalTime::new(1, 1));

        let cache = backend.cache().lock();
        assert!(!cache.is_valid(range(3, 7)));
        assert!(cache.is_valid(range(0, 3)));
        assert!(cache.is_valid(range(7, 10)));
        drop(cache);

        assert_eq!(backend.pop_next_frame_from_queue(), Some(range(3, 7)));
    }

    #[test]
    fn test_widening_clamps_at_zero() {
        let backend = common();
        backend.invalidate_cache_internal(range(0, 2), RationalTime::new(5, 1));
        let queued = backend.pop_next_frame_from_queue().unwrap();
        assert_eq!(queued.start, RationalTime::ZERO);
        assert_eq!(queued.end(), RationalTime::new(7, 1));
    }

    #[test]
    fn test_truncate_cache_drops_trailing_state() {
        let backend = common();
        backend.cache().lock().mark_valid(range(0, 30), None);
        backend.enqueue(range(5, 8));
        backend.enqueue(range(20, 25));

        backend.truncate_cache(RationalTime::new(10, 1));

        let cache = backend.cache().lock();
        assert!(cache.is_valid(range(0, 10)));
        assert!(!cache.is_valid(range(10, 30)));
        drop(cache);

        // Only the pre-cut queue entry survives
        assert_eq!(backend.pop_next_frame_from_queue(), Some(range(5, 8)));
        assert_eq!(backend.pop_next_frame_from_queue(), None);
    }

    #[test]
    fn test_max_time_shift_over_compiled_nodes() {
        let mut backend = common();
        backend.connect_viewer(viewer(vec![
            node("gain", 0),
            node("echo", 2),
            node("fade", 1),
        ]));
        backend.compile().unwrap();
        assert_eq!(backend.max_time_shift(), RationalTime::new(2, 1));
    }

    #[test]
    fn test_dispatch_keeps_ranges_queued_when_pool_saturates() {
        struct GatedDecoder {
            gate: crossbeam_channel::Receiver<()>,
        }

        impl DecodeWorker for GatedDecoder {
            fn render(&self, _job: &RenderJob) -> cutline_core::Result<ArtifactId> {
                let _ = self.gate.recv();
                Ok(ArtifactId(7))
            }
        }

        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let backend = BackendCommon::new(
            RenderWorkerPool::new(1, Arc::new(GatedDecoder { gate: gate_rx })).unwrap(),
        );

        for i in 0..12 {
            backend.enqueue(range(i, i + 1));
        }

        // The single worker is blocked, so the bounded channel fills and
        // dispatch must return instead of blocking, leaving the rest queued.
        let dispatched = backend
            .dispatch_pending(|r| RenderJob {
                range: r,
                seek_timestamp: None,
            })
            .unwrap();
        assert!(dispatched < 12);
        assert_eq!(backend.queue_len(), 12 - dispatched);

        drop(gate_tx);

        // Later passes drain the leftovers as workers free up
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut total = dispatched;
        while total < 12 && std::time::Instant::now() < deadline {
            backend.pool().wait_idle(Duration::from_secs(5));
            total += backend
                .dispatch_pending(|r| RenderJob {
                    range: r,
                    seek_timestamp: None,
                })
                .unwrap();
        }
        assert_eq!(total, 12);
        assert_eq!(backend.queue_len(), 0);
    }

    #[test]
    fn test_dispatch_and_poll_marks_cache_valid() {
        let backend = common();
        backend.enqueue(range(0, 1));
        let n = backend
            .dispatch_pending(|r| RenderJob {
                range: r,
                seek_timestamp: None,
            })
            .unwrap();
        assert_eq!(n, 1);

        backend.pool().wait_idle(Duration::from_secs(5));
        // wait_idle consumed the outcome; re-submit to exercise poll path
        backend.enqueue(range(1, 2));
        backend
            .dispatch_pending(|r| RenderJob {
                range: r,
                seek_timestamp: None,
            })
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut done = Vec::new();
        while done.is_empty() && std::time::Instant::now() < deadline {
            done = backend.poll_completions();
            std::thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(done.len(), 1);
        assert!(backend.cache().lock().is_valid(range(1, 2)));
    }
}
