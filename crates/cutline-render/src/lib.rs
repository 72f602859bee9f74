//! Cutline Render - Cache, conform and backend orchestration
//!
//! The render half of the pipeline:
//! - [`RenderCache`]: disjoint validated time ranges with invalidation
//! - [`ConformCoordinator`]: deduplicated asynchronous reformat jobs
//! - [`RenderWorkerPool`]: parallel decode/render job execution
//! - [`AudioRenderBackend`] / [`VideoRenderBackend`]: per-media orchestration
//!   tying the cache, the frame index and the workers together

pub mod audio;
pub mod backend;
pub mod cache;
pub mod conform;
pub mod video;
pub mod worker;

pub use audio::{AudioRenderBackend, AudioSource};
pub use backend::{BackendCommon, GraphNode, RenderRejection, RenderResponse, ViewerOutput};
pub use cache::{ArtifactId, RenderCache};
pub use conform::{
    ConformCoordinator, ConformDispatchFailure, ConformDispatcher, ConformKey,
    ConformRequestOutcome, ConformState, ConformWaitInfo,
};
pub use video::{VideoRenderBackend, VideoSource};
pub use worker::{DecodeWorker, RenderJob, RenderOutcome, RenderWorkerPool, Submission};
