//! Video render backend.
//!
//! The video specialization has no conform path: a frame render either hits
//! the cache or resolves its seek point through the stream's frame index and
//! goes straight to a worker. Incomplete indexes defer the request instead
//! of treating the time as out of range.

use crate::backend::{BackendCommon, RenderRejection, RenderResponse};
use crate::worker::RenderJob;
use cutline_core::{CutlineError, RationalTime, StreamDescriptor, TimeRange, VideoParams};
use cutline_index::{FrameIndex, IndexQuery};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A video source as the backend sees it.
pub struct VideoSource {
    /// Stream identity and timing metadata
    pub descriptor: StreamDescriptor,
    /// Seek-point index, possibly still being built
    pub index: Arc<FrameIndex>,
}

/// Video specialization of the render backend.
pub struct VideoRenderBackend {
    common: BackendCommon,
    params: Option<VideoParams>,
}

impl VideoRenderBackend {
    /// Create a video backend around shared state.
    pub fn new(common: BackendCommon) -> Self {
        Self {
            common,
            params: None,
        }
    }

    /// Shared backend state (viewer, cache, queue, events).
    pub fn common(&self) -> &BackendCommon {
        &self.common
    }

    /// Mutable shared backend state.
    pub fn common_mut(&mut self) -> &mut BackendCommon {
        &mut self.common
    }

    /// Current rendering parameters.
    pub fn params(&self) -> Option<VideoParams> {
        self.params
    }

    /// Replace the rendering parameters.
    ///
    /// Contract: the backend must be stopped. Frame size, rate or divider
    /// changes make every cached frame the wrong format, so any difference
    /// clears the cache.
    pub fn set_params(&mut self, params: VideoParams) -> cutline_core::Result<()> {
        let stopped = self.common.is_stopped();
        debug_assert!(stopped, "set_params requires a stopped backend");
        if !stopped {
            return Err(CutlineError::InvalidParameter(
                "cannot change parameters while the backend is running".into(),
            ));
        }
        if !params.is_valid() {
            return Err(CutlineError::InvalidParameter(
                "video parameters are not usable".into(),
            ));
        }

        if self.params.map(|p| p != params).unwrap_or(false) {
            self.common.cache().lock().clear();
            info!(?params, "video parameters changed, cache cleared");
        }

        self.params = Some(params);
        self.common.notify_params_changed();
        Ok(())
    }

    /// Gate for render requests.
    pub fn can_render(&self) -> bool {
        self.common.has_viewer()
            && self.common.is_compiled()
            && self.params.map(|p| p.is_valid()).unwrap_or(false)
    }

    /// Cache identity for the compiled graph under the current parameters.
    pub fn cache_id(&self) -> cutline_core::Result<String> {
        let params = self
            .params
            .ok_or_else(|| CutlineError::Render("cache id requires parameters".into()))?;
        let bytes = serde_json::to_vec(&params)
            .map_err(|e| CutlineError::Internal(format!("params serialization: {e}")))?;
        self.common.cache_id(&bytes)
    }

    /// Service a render request for `range` against `source`. Never blocks
    /// the caller.
    pub fn render(&mut self, range: TimeRange, source: &VideoSource) -> RenderResponse {
        if !self.can_render() {
            let reason = if !self.common.has_viewer() {
                RenderRejection::NoViewer
            } else if !self.common.is_compiled() {
                RenderRejection::NotCompiled
            } else {
                RenderRejection::NoParams
            };
            return RenderResponse::Rejected(reason);
        }

        {
            let cache = self.common.cache().lock();
            if cache.is_valid(range) {
                return RenderResponse::Cached(cache.artifacts_in(range));
            }
        }

        if let IndexQuery::NotIndexedYet | IndexQuery::NoData =
            source.index.closest_timestamp_for_time(range.start)
        {
            debug!(?range, "frame index not ready, render deferred");
            return RenderResponse::WaitingForIndex;
        }

        self.common.enqueue(range);
        // Ranges re-enqueued by earlier invalidations ride along on this
        // dispatch, so every popped range resolves its own seek point.
        match self.common.dispatch_pending(|r| RenderJob {
            range: r,
            seek_timestamp: source.index.closest_timestamp_for_time(r.start).timestamp(),
        }) {
            Ok(_) => RenderResponse::Dispatched,
            Err(e) => {
                warn!(error = %e, "video render dispatch failed");
                RenderResponse::Rejected(RenderRejection::WorkersUnavailable)
            }
        }
    }

    /// Invalidate a range, widened by the graph's largest downstream time
    /// shift.
    pub fn invalidate_cache(&self, start: RationalTime, end: RationalTime) {
        let widen = self.common.max_time_shift();
        self.common
            .invalidate_cache_internal(TimeRange::from_start_end(start, end), widen);
    }

    /// Drop cached and queued work past `beyond`.
    pub fn truncate_cache(&self, beyond: RationalTime) {
        self.common.truncate_cache(beyond);
    }

    /// Stop the backend: drain the queue and wait out in-flight workers.
    pub fn stop(&mut self) {
        self.common.stop();
    }

    /// True when the backend holds no pending or in-flight work.
    pub fn is_stopped(&self) -> bool {
        self.common.is_stopped()
    }
}
