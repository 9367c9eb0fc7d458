//! Report worker pool.
//!
//! A fixed number of named OS threads drain a shared [`WorkQueue`], run one report
//! per video and append successes to a shared result list. Each worker owns a
//! [`WorkerBackoffState`] and reacts to classified failures:
//!
//! * rate limited: sleep `2^exponent + jitter`, requeue, raise the exponent; once the
//!   exponent is past the ceiling, requeue and exit instead of sleeping
//! * daily quota exhausted: exit immediately
//! * invalid credentials: refresh once and retry the same video; a second consecutive
//!   failure requeues and exits
//! * anything else: log and drop the video
//!
//! [`ReportPool::run`] returns only after every worker has exited.

use std::fmt;
use std::io;
use std::thread;

use chrono::NaiveDate;
use indicatif::ProgressBar;
use parking_lot::Mutex;
use thiserror::Error;

use crate::analytics::api::{ApiError, CredentialProvider, ReportSource};
use crate::analytics::backoff::{BackoffPolicy, Pause, ThreadSleep, WorkerBackoffState};
use crate::analytics::models::{Metric, ReportRow, VideoRef};
use crate::analytics::queue::WorkQueue;

/// Errors that prevent the pool from running at all.
#[derive(Error, Debug)]
pub(crate) enum PoolError {
    #[error("Failed to spawn report worker {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("Worker count must be at least 1")]
    NoWorkers,
}

pub(crate) type PoolResult<T> = Result<T, PoolError>;

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    /// The queue was empty.
    Drained,
    /// Rate limited with the backoff exponent already past the ceiling.
    BackoffExhausted,
    /// The API reported the daily quota as used up.
    QuotaExhausted,
    /// Credentials were rejected again after the one allowed refresh, or the refresh failed.
    CredentialsRejected,
    /// The worker thread panicked.
    Panicked,
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Drained => write!(f, "queue drained"),
            WorkerExit::BackoffExhausted => write!(f, "backoff ceiling exceeded"),
            WorkerExit::QuotaExhausted => write!(f, "daily quota exhausted"),
            WorkerExit::CredentialsRejected => write!(f, "credentials rejected"),
            WorkerExit::Panicked => write!(f, "panicked"),
        }
    }
}

/// What one worker did before exiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WorkerReport {
    pub(crate) name: String,
    pub(crate) exit: WorkerExit,
    pub(crate) reported: usize,
    pub(crate) dropped: usize,
    pub(crate) backoff_sleeps: usize,
    pub(crate) credential_refreshes: usize,
    /// The video in hand when the daily quota ran out. Not retried this run.
    pub(crate) abandoned: Option<VideoRef>,
}

impl WorkerReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            exit: WorkerExit::Drained,
            reported: 0,
            dropped: 0,
            backoff_sleeps: 0,
            credential_refreshes: 0,
            abandoned: None,
        }
    }
}

/// Result of a pool run.
#[derive(Debug)]
pub(crate) struct PoolOutcome {
    /// One row per successfully reported video, in completion order.
    pub(crate) rows: Vec<ReportRow>,
    pub(crate) workers: Vec<WorkerReport>,
    /// Videos without a report: those still queued after every worker exited,
    /// followed by any a worker abandoned on quota exhaustion.
    pub(crate) unprocessed: Vec<VideoRef>,
}

impl PoolOutcome {
    pub(crate) fn dropped(&self) -> usize {
        self.workers.iter().map(|w| w.dropped).sum()
    }
}

/// Thread-safe, append-only list of report rows.
#[derive(Debug, Default)]
pub(crate) struct ResultCollector {
    rows: Mutex<Vec<ReportRow>>,
}

impl ResultCollector {
    pub(crate) fn push(&self, row: ReportRow) {
        self.rows.lock().push(row);
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub(crate) fn into_rows(self) -> Vec<ReportRow> {
        self.rows.into_inner()
    }
}

/// A fixed-size pool of report workers for a single report date.
pub(crate) struct ReportPool<'a, R, C, P = ThreadSleep>
where
    R: ReportSource + ?Sized,
    C: CredentialProvider + ?Sized,
    P: Pause,
{
    reports: &'a R,
    credentials: &'a C,
    pause: P,
    policy: BackoffPolicy,
    workers: usize,
    date: NaiveDate,
    progress: ProgressBar,
    #[cfg(test)]
    refuse_spawn_from: Option<usize>,
}

impl<'a, R, C> ReportPool<'a, R, C, ThreadSleep>
where
    R: ReportSource + ?Sized,
    C: CredentialProvider + ?Sized,
{
    pub(crate) fn new(reports: &'a R, credentials: &'a C, date: NaiveDate) -> Self {
        Self {
            reports,
            credentials,
            pause: ThreadSleep,
            policy: BackoffPolicy::default(),
            workers: 5,
            date,
            progress: ProgressBar::hidden(),
            #[cfg(test)]
            refuse_spawn_from: None,
        }
    }
}

impl<'a, R, C, P> ReportPool<'a, R, C, P>
where
    R: ReportSource + ?Sized,
    C: CredentialProvider + ?Sized,
    P: Pause,
{
    pub(crate) fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub(crate) fn policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub(crate) fn progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Replaces how workers wait out rate limits.
    pub(crate) fn pause_with<Q: Pause>(self, pause: Q) -> ReportPool<'a, R, C, Q> {
        ReportPool {
            reports: self.reports,
            credentials: self.credentials,
            pause,
            policy: self.policy,
            workers: self.workers,
            date: self.date,
            progress: self.progress,
            #[cfg(test)]
            refuse_spawn_from: self.refuse_spawn_from,
        }
    }

    pub(crate) fn date(&self) -> NaiveDate {
        self.date
    }

    /// Drains `queue` with the configured number of workers and waits for all of them.
    pub(crate) fn run(&self, queue: &WorkQueue) -> PoolResult<PoolOutcome> {
        if self.workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        info!(
            "Running reports for {} videos on {} with {} workers...",
            queue.len(),
            self.date,
            self.workers
        );

        self.progress.set_length(queue.len() as u64);
        let results = ResultCollector::default();
        let mut workers = Vec::with_capacity(self.workers);

        thread::scope(|scope| -> PoolResult<()> {
            let mut handles = Vec::with_capacity(self.workers);
            for index in 0..self.workers {
                let name = format!("run_reports-{index}");
                let results = &results;
                let spawned = self.check_spawn(index).and_then(|()| {
                    thread::Builder::new()
                        .name(name.clone())
                        .spawn_scoped(scope, move || {
                            let mut report = WorkerReport::new(&name);
                            report.exit = self.work(queue, results, &mut report);
                            info!(
                                "Worker exiting ({}): {} reported, {} dropped, {} backoff sleeps",
                                report.exit,
                                report.reported,
                                report.dropped,
                                report.backoff_sleeps
                            );
                            report
                        })
                });
                match spawned {
                    Ok(handle) => handles.push((index, handle)),
                    // Workers already running keep draining the queue, so nothing they
                    // collect is lost. Without any of them the queue is left untouched.
                    Err(source) if handles.is_empty() => {
                        return Err(PoolError::Spawn { index, source });
                    }
                    Err(e) => {
                        error!(
                            "Failed to spawn report worker {}, continuing with {} workers: {}",
                            index,
                            handles.len(),
                            e
                        );
                        break;
                    }
                }
            }

            for (index, handle) in handles {
                match handle.join() {
                    Ok(report) => workers.push(report),
                    Err(_) => {
                        error!("Report worker {} panicked", index);
                        let mut report = WorkerReport::new(&format!("run_reports-{index}"));
                        report.exit = WorkerExit::Panicked;
                        workers.push(report);
                    }
                }
            }
            Ok(())
        })?;

        self.progress.finish_and_clear();

        let mut unprocessed = queue.drain();
        unprocessed.extend(workers.iter().filter_map(|w| w.abandoned.clone()));
        info!(
            "Reports finished: {} rows collected, {} videos left unprocessed",
            results.len(),
            unprocessed.len()
        );
        let rows = results.into_rows();

        Ok(PoolOutcome {
            rows,
            workers,
            unprocessed,
        })
    }

    #[cfg(not(test))]
    fn check_spawn(&self, _index: usize) -> io::Result<()> {
        Ok(())
    }

    #[cfg(test)]
    fn check_spawn(&self, index: usize) -> io::Result<()> {
        match self.refuse_spawn_from {
            Some(from) if index >= from => Err(io::Error::other("thread limit reached")),
            _ => Ok(()),
        }
    }

    /// The body of one worker. Returns when the worker reaches its exit state.
    fn work(
        &self,
        queue: &WorkQueue,
        results: &ResultCollector,
        report: &mut WorkerReport,
    ) -> WorkerExit {
        let mut state = WorkerBackoffState::new(self.policy);

        while let Some(video) = queue.try_pop() {
            info!("Running report for {}...", video);

            // Retried in place only after a credential refresh.
            loop {
                match self.reports.query_report(&video, self.date) {
                    Ok(metrics) => {
                        debug!(
                            "Report for {}: {} views, {} likes",
                            video,
                            metrics.get(Metric::Views),
                            metrics.get(Metric::Likes)
                        );
                        results.push(ReportRow {
                            video_id: video.video_id().to_string(),
                            metrics,
                        });
                        state.record_success();
                        report.reported += 1;
                        self.progress.inc(1);
                        break;
                    }
                    Err(ApiError::RateLimited(message)) => {
                        if state.exhausted() {
                            error!(
                                "Rate limited on {} with backoff exponent {} past the ceiling, giving up: {}",
                                video,
                                state.backoff_exponent(),
                                message
                            );
                            queue.push(video);
                            return WorkerExit::BackoffExhausted;
                        }

                        let delay = state.delay();
                        warn!(
                            "Rate limited on {}: {}. Backing off for {:.1}s (exponent {})",
                            video,
                            message,
                            delay.as_secs_f64(),
                            state.backoff_exponent()
                        );
                        self.pause.pause(delay);
                        report.backoff_sleeps += 1;
                        queue.push(video);
                        state.escalate();
                        break;
                    }
                    Err(ApiError::QuotaExhausted(message)) => {
                        error!(
                            "Daily quota exhausted while reporting {}, stopping worker: {}",
                            video, message
                        );
                        report.abandoned = Some(video);
                        return WorkerExit::QuotaExhausted;
                    }
                    Err(ApiError::InvalidCredentials(message)) => {
                        if !state.take_credential_retry() {
                            error!(
                                "Credentials rejected again for {}, stopping worker: {}",
                                video, message
                            );
                            queue.push(video);
                            return WorkerExit::CredentialsRejected;
                        }

                        warn!(
                            "Credentials rejected for {}: {}. Refreshing access token...",
                            video, message
                        );
                        report.credential_refreshes += 1;
                        if let Err(e) = self.credentials.refresh_access_token() {
                            error!("Access token refresh failed, stopping worker: {}", e);
                            queue.push(video);
                            return WorkerExit::CredentialsRejected;
                        }
                    }
                    Err(ApiError::Transport(message)) => {
                        error!("Report for {} failed, skipping it: {}", video, message);
                        report.dropped += 1;
                        self.progress.inc(1);
                        break;
                    }
                }
            }
        }

        WorkerExit::Drained
    }
}
