//! Validity tracking for rendered output.
//!
//! The cache records which timeline ranges hold a valid rendered artifact.
//! Artifact storage itself lives elsewhere (a frame/sample buffer cache);
//! entries here carry only an opaque handle. Validated ranges are kept
//! disjoint and sorted: invalidation removes or truncates overlapping
//! entries so a partially-stale range is never reported valid.

use cutline_core::TimeRange;

/// Opaque handle into the external artifact store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactId(pub u64);

#[derive(Debug, Clone)]
struct CacheEntry {
    range: TimeRange,
    artifact: Option<ArtifactId>,
}

/// Set of disjoint validated time ranges for one backend.
#[derive(Debug, Default)]
pub struct RenderCache {
    // Sorted by range start, pairwise disjoint
    entries: Vec<CacheEntry>,
}

impl RenderCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove validity for every sub-range overlapping `range`.
    ///
    /// Entries partially covered are truncated, keeping their artifact
    /// handle for the surviving portion. Widening for time-remapping nodes
    /// is the caller's responsibility; `range` is taken as-is.
    pub fn invalidate(&mut self, range: TimeRange) {
        if range.is_empty() {
            return;
        }

        let mut kept = Vec::with_capacity(self.entries.len() + 1);

        for entry in self.entries.drain(..) {
            if !entry.range.overlaps(range) {
                kept.push(entry);
                continue;
            }

            // Left remainder survives
            if entry.range.start < range.start {
                kept.push(CacheEntry {
                    range: TimeRange::from_start_end(entry.range.start, range.start),
                    artifact: entry.artifact,
                });
            }

            // Right remainder survives
            if entry.range.end() > range.end() {
                kept.push(CacheEntry {
                    range: TimeRange::from_start_end(range.end(), entry.range.end()),
                    artifact: entry.artifact,
                });
            }
        }

        self.entries = kept;
        self.entries.sort_by_key(|e| e.range.start);
    }

    /// True only if `range` is entirely covered by validated entries.
    /// Adjacent entries may tile the range together.
    pub fn is_valid(&self, range: TimeRange) -> bool {
        if range.is_empty() {
            return true;
        }

        let mut cursor = range.start;

        for entry in &self.entries {
            if entry.range.end() <= cursor {
                continue;
            }
            if entry.range.start > cursor {
                // Gap at the cursor
                return false;
            }
            cursor = entry.range.end();
            if cursor >= range.end() {
                return true;
            }
        }

        false
    }

    /// Install a validated entry over `range`.
    ///
    /// Contract: the caller owns `artifact` and guarantees it represents
    /// exactly the current rendering parameters. Overlapping validity is
    /// replaced so entries stay disjoint.
    pub fn mark_valid(&mut self, range: TimeRange, artifact: Option<ArtifactId>) {
        if range.is_empty() {
            return;
        }

        self.invalidate(range);

        let pos = self
            .entries
            .partition_point(|e| e.range.start < range.start);
        self.entries.insert(pos, CacheEntry { range, artifact });
    }

    /// Drop all validity. Used when rendering parameters change
    /// incompatibly.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Artifact handles whose entries overlap `range`, in time order.
    pub fn artifacts_in(&self, range: TimeRange) -> Vec<ArtifactId> {
        self.entries
            .iter()
            .filter(|e| e.range.overlaps(range))
            .filter_map(|e| e.artifact)
            .collect()
    }

    /// Snapshot of the validated ranges, in time order.
    pub fn validated_ranges(&self) -> Vec<TimeRange> {
        self.entries.iter().map(|e| e.range).collect()
    }

    /// End of the latest validated range, if any.
    pub fn latest_end(&self) -> Option<cutline_core::RationalTime> {
        self.entries.iter().map(|e| e.range.end()).max()
    }
}
