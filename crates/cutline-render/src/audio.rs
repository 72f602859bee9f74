//! Audio render backend.
//!
//! The audio specialization adds the conform path: when a source stream's
//! native format does not match the rendering parameters, the render is not
//! dispatched directly. Instead the backend registers with the
//! [`ConformCoordinator`] and records a [`ConformWaitInfo`] so the deferred
//! render can resume exactly once the conform finishes. Coalescing of
//! multiple deferred ranges for one (stream, params) key happens in the
//! coordinator, not here.

use crate::backend::{BackendCommon, RenderRejection, RenderResponse};
use crate::conform::{
    ConformCoordinator, ConformDispatcher, ConformKey, ConformRequestOutcome, ConformWaitInfo,
};
use crate::worker::RenderJob;
use cutline_core::{AudioParams, CutlineError, RationalTime, StreamDescriptor, TimeRange};
use cutline_index::{FrameIndex, IndexQuery};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An audio source as the backend sees it: identity, native format, and the
/// shared frame index built by the background indexing pass.
pub struct AudioSource {
    /// Stream identity and timing metadata
    pub descriptor: StreamDescriptor,
    /// The stream's native decode format
    pub native_params: AudioParams,
    /// Seek-point index, possibly still being built
    pub index: Arc<FrameIndex>,
}

/// Audio specialization of the render backend.
pub struct AudioRenderBackend {
    common: BackendCommon,
    params: Option<AudioParams>,
    coordinator: Arc<ConformCoordinator>,
    dispatcher: Arc<dyn ConformDispatcher>,
    conform_waits: Vec<ConformWaitInfo>,
}

impl AudioRenderBackend {
    /// Create an audio backend around shared collaborators.
    pub fn new(
        common: BackendCommon,
        coordinator: Arc<ConformCoordinator>,
        dispatcher: Arc<dyn ConformDispatcher>,
    ) -> Self {
        Self {
            common,
            params: None,
            coordinator,
            dispatcher,
            conform_waits: Vec::new(),
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
    pub fn params(&self) -> Option<AudioParams> {
        self.params
    }

    /// Replace the rendering parameters.
    ///
    /// Contract: the backend must be stopped (empty queue, no active
    /// workers). A mid-flight change would corrupt in-progress renders, so
    /// violating this is a programming error, asserted in debug builds and
    /// reported as `InvalidParameter` in all builds.
    pub fn set_params(&mut self, params: AudioParams) -> cutline_core::Result<()> {
        let stopped = self.common.is_stopped();
        debug_assert!(stopped, "set_params requires a stopped backend");
        if !stopped {
            return Err(CutlineError::InvalidParameter(
                "cannot change parameters while the backend is running".into(),
            ));
        }
        if !params.is_valid() {
            return Err(CutlineError::InvalidParameter(
                "audio parameters are not usable".into(),
            ));
        }

        let incompatible = self.params.map(|p| p != params).unwrap_or(false);
        if incompatible {
            // Every cached artifact was rendered in the old format
            self.common.cache().lock().clear();
            info!(?params, "audio parameters changed, cache cleared");
        }

        self.params = Some(params);
        self.common.notify_params_changed();
        Ok(())
    }

    /// Gate for render requests: viewer connected, graph compiled,
    /// parameters set and valid.
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

    /// Service a render request for `range` against `source`.
    ///
    /// Resolves synchronously from cache, dispatches to a worker, or defers
    /// on index/conform progress. Never blocks the caller.
    pub fn render(&mut self, range: TimeRange, source: &AudioSource) -> RenderResponse {
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
        // can_render guarantees params
        let params = match self.params {
            Some(p) => p,
            None => return RenderResponse::Rejected(RenderRejection::NoParams),
        };

        {
            let cache = self.common.cache().lock();
            if cache.is_valid(range) {
                return RenderResponse::Cached(cache.artifacts_in(range));
            }
        }

        if let IndexQuery::NotIndexedYet | IndexQuery::NoData =
            source.index.closest_timestamp_for_time(range.start)
        {
            debug!(?range, "index not ready, render deferred");
            return RenderResponse::WaitingForIndex;
        }

        if source.native_params != params {
            return self.defer_on_conform(range, source, params);
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
                warn!(error = %e, "audio render dispatch failed");
                RenderResponse::Rejected(RenderRejection::WorkersUnavailable)
            }
        }
    }

    fn defer_on_conform(
        &mut self,
        range: TimeRange,
        source: &AudioSource,
        params: AudioParams,
    ) -> RenderResponse {
        let waiter = ConformWaitInfo {
            stream: source.descriptor.id,
            params,
            affected_range: range,
            stream_time: range.start,
        };

        match self
            .coordinator
            .request_conform(waiter.clone(), self.dispatcher.as_ref())
        {
            Ok(ConformRequestOutcome::Ready) => {
                // Conformed resource already exists; render directly
                self.common.enqueue(range);
                match self.common.dispatch_pending(|r| RenderJob {
                    range: r,
                    seek_timestamp: None,
                }) {
                    Ok(_) => RenderResponse::Dispatched,
                    Err(e) => {
                        warn!(error = %e, "post-conform dispatch failed");
                        RenderResponse::Rejected(RenderRejection::WorkersUnavailable)
                    }
                }
            }
            Ok(_) => {
                if !self.conform_waits.contains(&waiter) {
                    self.conform_waits.push(waiter);
                }
                RenderResponse::WaitingForConform
            }
            Err(failure) => {
                // Waiters drained from a job that never started have nothing
                // left to wait on; drop any records this backend holds for
                // them so they cannot resume against a dead key.
                self.conform_waits.retain(|w| !failure.orphaned.contains(w));
                warn!(
                    error = %failure.error,
                    orphaned = failure.orphaned.len(),
                    "conform request failed"
                );
                RenderResponse::Rejected(RenderRejection::WorkersUnavailable)
            }
        }
    }

    /// Resume renders deferred on `key` after its conform finished.
    ///
    /// Each recorded wait is revalidated against current backend state
    /// before resuming; waits recorded under parameters that have since
    /// changed are dropped. Returns the number of ranges re-dispatched.
    pub fn on_conform_ready(&mut self, key: &ConformKey) -> cutline_core::Result<usize> {
        self.coordinator.on_conform_complete(key);

        let (matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.conform_waits)
            .into_iter()
            .partition(|w| w.key() == *key);
        self.conform_waits = rest;

        let current = self.params;
        let mut resumed = 0;
        for wait in matching {
            if current != Some(wait.params) {
                debug!(?key, "dropping stale conform wait after parameter change");
                continue;
            }
            self.common.enqueue(wait.affected_range);
            resumed += 1;
        }

        if resumed > 0 {
            self.common.dispatch_pending(|r| RenderJob {
                range: r,
                seek_timestamp: None,
            })?;
        }

        Ok(resumed)
    }

    /// Drop waits deferred on `key` after its conform failed, returning
    /// them so the caller can retry or surface the failure.
    pub fn on_conform_failed(&mut self, key: &ConformKey) -> Vec<ConformWaitInfo> {
        self.coordinator.on_conform_failed(key);

        let (failed, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.conform_waits)
            .into_iter()
            .partition(|w| w.key() == *key);
        self.conform_waits = rest;

        if !failed.is_empty() {
            warn!(?key, waiters = failed.len(), "conform failed, renders abandoned");
        }
        failed
    }

    /// Ranges currently deferred on conform completion.
    pub fn pending_conform_waits(&self) -> &[ConformWaitInfo] {
        &self.conform_waits
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

    /// Stop the backend: drain the queue, wait out in-flight workers and
    /// detach conform waiters so a late completion does not dispatch into
    /// state that no longer expects it.
    pub fn stop(&mut self) {
        self.common.stop();

        let own: Vec<ConformWaitInfo> = std::mem::take(&mut self.conform_waits);
        self.coordinator.detach_waiters(|w| own.contains(w));
    }

    /// True when the backend holds no pending or in-flight work.
    pub fn is_stopped(&self) -> bool {
        self.common.is_stopped()
    }
}
