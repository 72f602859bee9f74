//! Conform job coordination.
//!
//! A source stream whose native format does not match the rendering
//! parameters must be reformatted ("conformed") before any render against it
//! can proceed. Conforms are expensive and asynchronous, so the coordinator
//! tracks one state machine per (stream, parameter tuple) key:
//!
//! `Idle -> Requested -> InProgress -> Available`
//!
//! At most one conform job is in flight per key; concurrent requests for the
//! same key attach as waiters instead of spawning duplicate work. `Available`
//! entries persist until an explicit [`ConformCoordinator::clear`], so later
//! requests for a finished key are satisfied immediately.

use cutline_core::{AudioParams, CutlineError, RationalTime, StreamId, TimeRange};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Identity of one conform job: the stream plus the full parameter tuple.
/// Any parameter difference creates a distinct key and a distinct job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConformKey {
    pub stream: StreamId,
    pub params: AudioParams,
}

/// Lifecycle of one conform job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConformState {
    /// No job exists for the key.
    Idle,
    /// A job has been created but not yet handed to the conform worker.
    Requested,
    /// The conform worker is running the job.
    InProgress,
    /// The conformed resource is durably available.
    Available,
}

/// A render deferred until its conform finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConformWaitInfo {
    /// Stream being conformed
    pub stream: StreamId,
    /// Target parameters
    pub params: AudioParams,
    /// Timeline range whose render is blocked
    pub affected_range: TimeRange,
    /// Stream-local time of the deferred render
    pub stream_time: RationalTime,
}

impl ConformWaitInfo {
    /// The coordinator key this waiter belongs to.
    pub fn key(&self) -> ConformKey {
        ConformKey {
            stream: self.stream,
            params: self.params,
        }
    }
}

/// Outcome of a conform request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConformRequestOutcome {
    /// A new job was dispatched to the conform worker.
    Dispatched,
    /// A job for this key is already running; the waiter was attached.
    AlreadyPending,
    /// The conformed resource already exists; no waiting needed.
    Ready,
}

/// A conform job that could not be started at all.
///
/// Carries every waiter drained from the key, including any that attached
/// while dispatch was being attempted, so the caller can surface the failure
/// to them the same way it would after
/// [`ConformCoordinator::on_conform_failed`]. A job that never started has
/// no asynchronous completion path, so nothing else will ever notify them.
#[derive(Debug)]
pub struct ConformDispatchFailure {
    /// The dispatcher's error
    pub error: CutlineError,
    /// Waiters left with no job to wait on
    pub orphaned: Vec<ConformWaitInfo>,
}

/// External collaborator that performs the reformat asynchronously and later
/// reports back through [`ConformCoordinator::on_conform_complete`] or
/// [`ConformCoordinator::on_conform_failed`].
pub trait ConformDispatcher: Send + Sync {
    /// Hand a conform job to the worker. Returning `Err` means the job could
    /// not be started at all.
    fn dispatch(&self, key: &ConformKey) -> cutline_core::Result<()>;
}

struct KeyEntry {
    state: ConformState,
    waiters: Vec<ConformWaitInfo>,
}

/// Tracks in-flight conform jobs and the renders waiting on them.
pub struct ConformCoordinator {
    jobs: Mutex<HashMap<ConformKey, KeyEntry>>,
}

impl Default for ConformCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConformCoordinator {
    /// Create a coordinator with no jobs.
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Current state for a key. Absent keys are `Idle`.
    pub fn state(&self, key: &ConformKey) -> ConformState {
        self.jobs
            .lock()
            .get(key)
            .map(|e| e.state)
            .unwrap_or(ConformState::Idle)
    }

    /// Register interest in a conformed resource.
    ///
    /// If no job exists for the waiter's key, one is dispatched through
    /// `dispatcher`; if one is already pending, the waiter attaches to it;
    /// if the resource is available, the caller may proceed immediately.
    ///
    /// A dispatch error returns the key to `Idle` and drains every attached
    /// waiter into the returned [`ConformDispatchFailure`].
    pub fn request_conform(
        &self,
        waiter: ConformWaitInfo,
        dispatcher: &dyn ConformDispatcher,
    ) -> Result<ConformRequestOutcome, ConformDispatchFailure> {
        let key = waiter.key();

        {
            let mut jobs = self.jobs.lock();
            let entry = jobs.entry(key).or_insert_with(|| KeyEntry {
                state: ConformState::Idle,
                waiters: Vec::new(),
            });

            match entry.state {
                ConformState::Available => return Ok(ConformRequestOutcome::Ready),
                ConformState::Requested | ConformState::InProgress => {
                    entry.waiters.push(waiter);
                    return Ok(ConformRequestOutcome::AlreadyPending);
                }
                ConformState::Idle => {
                    entry.state = ConformState::Requested;
                    entry.waiters.push(waiter);
                }
            }
        }

        // Dispatch outside the lock; the Requested state blocks duplicate
        // dispatches from concurrent requests in the meantime.
        match dispatcher.dispatch(&key) {
            Ok(()) => {
                let mut jobs = self.jobs.lock();
                if let Some(entry) = jobs.get_mut(&key) {
                    entry.state = ConformState::InProgress;
                }
                debug!(?key, "conform job dispatched");
                Ok(ConformRequestOutcome::Dispatched)
            }
            Err(e) => {
                let orphaned = {
                    let mut jobs = self.jobs.lock();
                    match jobs.get_mut(&key) {
                        Some(entry) => {
                            entry.state = ConformState::Idle;
                            std::mem::take(&mut entry.waiters)
                        }
                        None => Vec::new(),
                    }
                };
                warn!(?key, error = %e, orphaned = orphaned.len(), "conform dispatch failed");
                Err(ConformDispatchFailure { error: e, orphaned })
            }
        }
    }

    /// Record a finished conform: the key becomes `Available` and every
    /// registered waiter is returned so the caller can resume its deferred
    /// render.
    pub fn on_conform_complete(&self, key: &ConformKey) -> Vec<ConformWaitInfo> {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(key) {
            Some(entry) => {
                entry.state = ConformState::Available;
                std::mem::take(&mut entry.waiters)
            }
            None => {
                // Completion for a key nobody asked for; record availability
                // anyway so the next request is a hit.
                jobs.insert(
                    *key,
                    KeyEntry {
                        state: ConformState::Available,
                        waiters: Vec::new(),
                    },
                );
                Vec::new()
            }
        }
    }

    /// Record a failed conform: the key returns to `Idle` so a retry is
    /// possible, and every waiter is returned so the caller can surface the
    /// failure. The coordinator never retries on its own.
    pub fn on_conform_failed(&self, key: &ConformKey) -> Vec<ConformWaitInfo> {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(key) {
            Some(entry) => {
                entry.state = ConformState::Idle;
                std::mem::take(&mut entry.waiters)
            }
            None => Vec::new(),
        }
    }

    /// Remove every waiter matching `predicate`, across all keys. Used by a
    /// stopping backend so a late completion does not dispatch into it.
    pub fn detach_waiters(&self, mut predicate: impl FnMut(&ConformWaitInfo) -> bool) {
        let mut jobs = self.jobs.lock();
        for entry in jobs.values_mut() {
            entry.waiters.retain(|w| !predicate(w));
        }
    }

    /// Number of waiters currently attached to `key`.
    pub fn waiter_count(&self, key: &ConformKey) -> usize {
        self.jobs
            .lock()
            .get(key)
            .map(|e| e.waiters.len())
            .unwrap_or(0)
    }

    /// Drop all jobs, including `Available` entries. Conformed resources
    /// must be re-requested afterwards.
    pub fn clear(&self) {
        self.jobs.lock().clear();
    }
}
