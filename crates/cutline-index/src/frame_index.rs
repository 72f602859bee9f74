//! Per-stream frame index.
//!
//! Maps compressed-media timestamps to decodable seek points. The index is
//! built incrementally by a background indexing pass while decode and
//! playback threads query it concurrently, so every operation takes the one
//! per-stream lock for the duration of the container operation only.
//!
//! A complete index ends with [`END_TIMESTAMP`]; until that sentinel is
//! appended, queries past the indexed region answer "not indexed yet" rather
//! than "out of range", and the caller is expected to retry after the next
//! index-changed notification.

use cutline_core::{IndexEvent, RationalTime, SignalHub, Timebase};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Sentinel appended as the final entry of a complete index.
pub const END_TIMESTAMP: i64 = i64::MIN;

/// Result of a seek-point lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexQuery {
    /// The greatest indexed timestamp at or before the query.
    Found(i64),
    /// The query falls beyond indexed data but indexing is still running;
    /// retry after the next index change.
    NotIndexedYet,
    /// The index holds no entries at all.
    NoData,
}

impl IndexQuery {
    /// The found timestamp, if any.
    pub fn timestamp(self) -> Option<i64> {
        match self {
            Self::Found(ts) => Some(ts),
            _ => None,
        }
    }
}

/// Thread-safe, append-only index of decodable timestamps for one stream.
///
/// Caller contract: timestamps must be appended in non-decreasing native
/// timebase order. Out-of-order appends are not detected and break lookup
/// correctness.
pub struct FrameIndex {
    entries: Mutex<Vec<i64>>,
    timebase: Timebase,
    start_time: i64,
    changed: SignalHub<IndexEvent>,
}

impl FrameIndex {
    /// Create an empty index for a stream with the given timebase and
    /// start-time offset.
    pub fn new(timebase: Timebase, start_time: i64) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            timebase,
            start_time,
            changed: SignalHub::new(),
        }
    }

    /// Hub publishing [`IndexEvent::Changed`] after every mutation.
    pub fn changed(&self) -> &SignalHub<IndexEvent> {
        &self.changed
    }

    /// The stream's native timestamp units.
    pub fn timebase(&self) -> Timebase {
        self.timebase
    }

    /// Append one timestamp. Must be >= every previously appended entry.
    pub fn append(&self, ts: i64) {
        {
            let mut entries = self.entries.lock();
            entries.push(ts);
        }
        self.changed.emit(&IndexEvent::Changed);
    }

    /// Seal the index by appending the end marker. After this the index is
    /// immutable and may be persisted verbatim.
    pub fn append_end_marker(&self) {
        self.append(END_TIMESTAMP);
    }

    /// Truncate the index to empty.
    pub fn clear(&self) {
        {
            let mut entries = self.entries.lock();
            entries.clear();
        }
        self.changed.emit(&IndexEvent::Changed);
    }

    /// True iff the index is non-empty and its last entry is the end marker.
    pub fn is_complete(&self) -> bool {
        let entries = self.entries.lock();
        entries.last() == Some(&END_TIMESTAMP)
    }

    /// Number of entries, including the end marker if present.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if no entries have been appended.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// The most recently appended entry.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.entries.lock().last().copied()
    }

    /// Find the greatest indexed timestamp at or before `timestamp`.
    ///
    /// The query is offset by the stream's start time before lookup. A query
    /// at or before zero answers with the first entry. If the index is
    /// complete and the query exceeds all entries, the end marker is
    /// returned; if it is incomplete, the answer is
    /// [`IndexQuery::NotIndexedYet`] and the caller should wait for more
    /// indexing rather than treat the time as out of range.
    ///
    /// `Found` can carry [`END_TIMESTAMP`] itself: past a complete index, or
    /// from a zero-frame stream whose only entry is the marker. Callers must
    /// treat that value as end-of-stream, never as a decodable seek point.
    pub fn closest_timestamp(&self, timestamp: i64) -> IndexQuery {
        let entries = self.entries.lock();

        if entries.is_empty() {
            return IndexQuery::NoData;
        }

        let target = timestamp + self.start_time;

        if target <= 0 {
            return IndexQuery::Found(entries[0]);
        }

        let complete = entries.last() == Some(&END_TIMESTAMP);
        let scan_len = if complete {
            entries.len() - 1
        } else {
            entries.len()
        };

        // Linear scan; index sizes are bounded by stream frame count and
        // queries are rare relative to decode cost.
        for i in 0..scan_len {
            let this_ts = entries[i];
            if this_ts == target {
                return IndexQuery::Found(target);
            } else if this_ts > target {
                if i == 0 {
                    return IndexQuery::Found(entries[0]);
                }
                return IndexQuery::Found(entries[i - 1]);
            }
        }

        if complete {
            IndexQuery::Found(END_TIMESTAMP)
        } else {
            IndexQuery::NotIndexedYet
        }
    }

    /// Time-domain lookup: convert a playhead time through the stream
    /// timebase, then delegate to [`closest_timestamp`].
    ///
    /// [`closest_timestamp`]: FrameIndex::closest_timestamp
    pub fn closest_timestamp_for_time(&self, time: RationalTime) -> IndexQuery {
        self.closest_timestamp(self.timebase.time_to_timestamp(time))
    }

    /// Persist the raw timestamp array to `path`.
    ///
    /// Format: native-endian i64s, no header, length implied by file size.
    /// The lock is held across the whole write so no append lands mid-file.
    pub fn save(&self, path: &Path) -> cutline_core::Result<()> {
        let entries = self.entries.lock();

        let mut file = File::create(path)?;
        for ts in entries.iter() {
            file.write_all(&ts.to_ne_bytes())?;
        }
        file.flush()?;

        debug!(entries = entries.len(), path = %path.display(), "saved frame index");
        Ok(())
    }

    /// Replace the index contents with the array stored at `path`.
    ///
    /// A truncated file is a valid in-progress index (no end marker).
    /// Failure leaves the existing entries untouched; the caller falls back
    /// to re-indexing from scratch.
    pub fn load(&self, path: &Path) -> cutline_core::Result<()> {
        let mut file = File::open(path)?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;

        let loaded: Vec<i64> = raw
            .chunks_exact(8)
            .map(|c| i64::from_ne_bytes(c.try_into().unwrap()))
            .collect();

        if raw.len() % 8 != 0 {
            warn!(path = %path.display(), "frame index file has trailing bytes, ignoring");
        }

        {
            let mut entries = self.entries.lock();
            *entries = loaded;
        }

        self.changed.emit(&IndexEvent::Changed);
        Ok(())
    }

    /// Snapshot of the raw entries, for diagnostics and tests.
    pub fn entries(&self) -> Vec<i64> {
        self.entries.lock().clone()
    }
}
