//! Render worker pool.
//!
//! A fixed set of threads executes decode/render jobs in parallel. Jobs go
//! in through a bounded crossbeam channel; outcomes come back on a result
//! channel the backend polls without blocking. The pool knows nothing about
//! caches or conforms; it only runs jobs against the [`DecodeWorker`]
//! collaborator.

use crate::cache::ArtifactId;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use cutline_core::{CutlineError, TimeRange};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One unit of render work: decode from the resolved seek point and render
/// the target range.
#[derive(Debug, Clone)]
pub struct RenderJob {
    /// Timeline range to produce
    pub range: TimeRange,
    /// Seek timestamp resolved via the frame index, if the source needs one
    pub seek_timestamp: Option<i64>,
}

/// Result of one job, delivered back to the backend.
#[derive(Debug)]
pub struct RenderOutcome {
    /// The job's target range
    pub range: TimeRange,
    /// Produced artifact, or the failure
    pub result: cutline_core::Result<ArtifactId>,
}

/// External decode/render collaborator.
pub trait DecodeWorker: Send + Sync {
    /// Produce the artifact for one job.
    fn render(&self, job: &RenderJob) -> cutline_core::Result<ArtifactId>;
}

/// Outcome of a non-blocking submit.
#[derive(Debug)]
pub enum Submission {
    /// The job is on the channel and a worker will pick it up.
    Accepted,
    /// The job channel is full; the job is handed back untouched so the
    /// caller can keep it queued and retry later.
    Saturated(RenderJob),
}

/// Pool of render worker threads draining one backend's job channel.
pub struct RenderWorkerPool {
    job_tx: Option<Sender<RenderJob>>,
    outcome_rx: Receiver<RenderOutcome>,
    in_flight: Arc<AtomicUsize>,
    handles: Vec<JoinHandle<()>>,
}

impl RenderWorkerPool {
    /// Spawn `workers` threads running jobs against `decoder`.
    pub fn new(workers: usize, decoder: Arc<dyn DecodeWorker>) -> cutline_core::Result<Self> {
        let workers = workers.max(1);
        let (job_tx, job_rx) = bounded::<RenderJob>(workers * 4);
        let (outcome_tx, outcome_rx) = bounded::<RenderOutcome>(workers * 4);
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let job_rx = job_rx.clone();
            let outcome_tx = outcome_tx.clone();
            let decoder = Arc::clone(&decoder);
            let handle = std::thread::Builder::new()
                .name(format!("cutline-render-{i}"))
                .spawn(move || {
                    // Exits when the job sender is dropped
                    while let Ok(job) = job_rx.recv() {
                        let result = decoder.render(&job);
                        if let Err(e) = &result {
                            warn!(error = %e, "render job failed");
                        }
                        let outcome = RenderOutcome {
                            range: job.range,
                            result,
                        };
                        if outcome_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                })?;
            handles.push(handle);
        }

        Ok(Self {
            job_tx: Some(job_tx),
            outcome_rx,
            in_flight,
            handles,
        })
    }

    /// Hand a job to the pool without blocking the calling thread.
    pub fn submit(&self, job: RenderJob) -> cutline_core::Result<Submission> {
        let tx = self
            .job_tx
            .as_ref()
            .ok_or_else(|| CutlineError::Render("worker pool is shut down".into()))?;
        // Counted before the send so a fast completion cannot be polled
        // ahead of the increment
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        match tx.try_send(job) {
            Ok(()) => Ok(Submission::Accepted),
            Err(TrySendError::Full(job)) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(Submission::Saturated(job))
            }
            Err(TrySendError::Disconnected(_)) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Err(CutlineError::Render("worker pool channel closed".into()))
            }
        }
    }

    /// Collect every outcome available right now, without blocking.
    pub fn poll_completions(&self) -> Vec<RenderOutcome> {
        let mut outcomes = Vec::new();
        loop {
            match self.outcome_rx.try_recv() {
                Ok(outcome) => {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    outcomes.push(outcome);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        outcomes
    }

    /// Number of submitted jobs whose outcomes have not been polled yet.
    pub fn active_jobs(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// True when no submitted job is outstanding.
    pub fn is_idle(&self) -> bool {
        self.active_jobs() == 0
    }

    /// Block until every outstanding job has completed and been collected,
    /// returning the collected outcomes. Gives up after `timeout`.
    pub fn wait_idle(&self, timeout: Duration) -> Vec<RenderOutcome> {
        let deadline = Instant::now() + timeout;
        let mut outcomes = Vec::new();

        while self.active_jobs() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    outstanding = self.active_jobs(),
                    "timed out waiting for render workers"
                );
                break;
            }
            match self.outcome_rx.recv_timeout(remaining.min(Duration::from_millis(50))) {
                Ok(outcome) => {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    outcomes.push(outcome);
                }
                Err(_) => continue,
            }
        }

        outcomes
    }

    /// Stop accepting work and join every worker thread.
    pub fn shutdown(&mut self) {
        self.job_tx = None;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("render worker panicked during shutdown");
            }
        }
        debug!("render worker pool shut down");
    }
}

impl Drop for RenderWorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
