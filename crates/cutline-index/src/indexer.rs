//! Background indexing pass.
//!
//! Indexing decodes a stream once on a dedicated thread, appending each
//! packet timestamp to the shared [`FrameIndex`] as it is discovered.
//! Readers on the render threads query the same index concurrently and see
//! it grow; when the source is exhausted the end marker is appended and the
//! sidecar file is written so later opens skip re-indexing entirely.

use crate::frame_index::FrameIndex;
use cutline_core::{CutlineError, StreamDescriptor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// External decode collaborator that yields packet timestamps in
/// non-decreasing native-timebase order.
pub trait IndexSource: Send {
    /// Next decodable timestamp, `Ok(None)` at end of stream.
    fn next_timestamp(&mut self) -> cutline_core::Result<Option<i64>>;
}

/// Sidecar file path for a stream's index, keyed by stream identity.
pub fn index_sidecar_path(cache_dir: &Path, descriptor: &StreamDescriptor) -> PathBuf {
    let file_name = descriptor
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "stream".to_string());
    cache_dir.join(format!(
        "{}.{}.idx",
        file_name, descriptor.stream_index
    ))
}

/// Handle to a running background indexing pass.
pub struct Indexer {
    handle: Option<JoinHandle<cutline_core::Result<()>>>,
}

impl Indexer {
    /// Open a stream's index: load the sidecar if a complete one exists,
    /// otherwise clear any partial state and start a fresh indexing pass.
    ///
    /// Returns `Ok(None)` if the sidecar satisfied the open and no pass was
    /// started.
    pub fn open(
        index: Arc<FrameIndex>,
        descriptor: &StreamDescriptor,
        cache_dir: &Path,
        source: Box<dyn IndexSource>,
    ) -> cutline_core::Result<Option<Self>> {
        let sidecar = index_sidecar_path(cache_dir, descriptor);

        match index.load(&sidecar) {
            Ok(()) if index.is_complete() => {
                info!(path = %sidecar.display(), "loaded complete frame index");
                return Ok(None);
            }
            Ok(()) => {
                debug!(path = %sidecar.display(), "sidecar index incomplete, re-indexing");
                index.clear();
            }
            Err(_) => {
                debug!(path = %sidecar.display(), "no sidecar index, indexing from scratch");
            }
        }

        Self::spawn(index, sidecar, source).map(Some)
    }

    /// Start an indexing pass on a dedicated thread, writing the sidecar at
    /// `sidecar` once the pass completes.
    pub fn spawn(
        index: Arc<FrameIndex>,
        sidecar: PathBuf,
        mut source: Box<dyn IndexSource>,
    ) -> cutline_core::Result<Self> {
        let handle = thread::Builder::new()
            .name("cutline-indexer".into())
            .spawn(move || -> cutline_core::Result<()> {
                loop {
                    match source.next_timestamp()? {
                        Some(ts) => index.append(ts),
                        None => break,
                    }
                }

                index.append_end_marker();
                info!(entries = index.len(), "indexing pass complete");

                if let Err(e) = index.save(&sidecar) {
                    // Not fatal: the in-memory index is still usable, the
                    // next open just re-indexes.
                    warn!(path = %sidecar.display(), error = %e, "failed to save index sidecar");
                }

                Ok(())
            })?;

        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Block until the indexing pass finishes.
    pub fn join(mut self) -> cutline_core::Result<()> {
        match self.handle.take() {
            Some(h) => h
                .join()
                .map_err(|_| CutlineError::Internal("indexer thread panicked".into()))?,
            None => Ok(()),
        }
    }
}
