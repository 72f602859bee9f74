//! Stream identity.
//!
//! A [`StreamDescriptor`] is the stable identity of one elementary stream
//! inside a media file. Frame-index sidecar files and conform jobs are keyed
//! by it.

use crate::time::Timebase;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for an opened stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub Uuid);

impl StreamId {
    /// Generate a fresh stream id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

/// What kind of media a stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Audio,
    Video,
}

/// Identity and timing metadata for one elementary stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Unique id for this opened stream
    pub id: StreamId,
    /// Source file path
    pub path: PathBuf,
    /// Index of this stream within the container
    pub stream_index: usize,
    /// Media kind
    pub kind: StreamKind,
    /// Native timestamp units
    pub timebase: Timebase,
    /// Offset added to query timestamps before index lookup
    pub start_time: i64,
}

impl StreamDescriptor {
    /// Create a descriptor for a stream within `path`.
    pub fn new(
        path: impl Into<PathBuf>,
        stream_index: usize,
        kind: StreamKind,
        timebase: Timebase,
    ) -> Self {
        Self {
            id: StreamId::new(),
            path: path.into(),
            stream_index,
            kind,
            timebase,
            start_time: 0,
        }
    }
}
