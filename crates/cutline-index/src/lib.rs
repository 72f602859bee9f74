//! Cutline Index - Per-stream frame indexing
//!
//! Maps compressed-media timestamps to decodable seek points:
//! - Thread-safe, append-only [`FrameIndex`] with sidecar persistence
//! - Background [`Indexer`] pass that builds the index while render
//!   threads query it concurrently

pub mod frame_index;
pub mod indexer;

pub use frame_index::{FrameIndex, IndexQuery, END_TIMESTAMP};
pub use indexer::{index_sidecar_path, IndexSource, Indexer};
