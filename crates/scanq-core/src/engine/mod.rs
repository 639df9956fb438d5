//! Job scheduling engine.
//!
//! The [`Scheduler`] owns the submission queue and drives one job at a time
//! through its phases, asking the rate limiter for admission before every
//! remote call and persisting a snapshot at every transition so a process
//! restart resumes exactly where it stopped. Waits are stored as absolute
//! wake times and checked on each tick, never slept through, so the engine
//! stays responsive to commands while a job is backing off.

pub mod worker;

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::credentials::{CredentialStore, Credentials};
use crate::digest::ContentDigest;
use crate::error::{Result, ScanqError};
use crate::job::{Job, Phase};
use crate::limiter::{Admission, RateLimiter};
use crate::observer::{Event, NullObserver, Observer};
use crate::progress::ProgressEstimator;
use crate::remote::{RemoteError, ReportRef, ScanService, UploadBody};
use crate::retry::{policy_from_config, RetryDecision, RetryPolicy};
use crate::state::{JobRecord, LastOutcome, PersistedState, StateStore};
use crate::store::BlobStore;

/// The job currently being driven, plus its per-attempt bookkeeping.
#[derive(Debug)]
struct ActiveJob {
    job: Job,
    attempt: u32,
    phase: Phase,
    started_at: u64,
    percent: u8,
    next_wake_at: Option<u64>,
    /// Memoized across attempts; the content cannot change once spooled.
    digest: Option<ContentDigest>,
    estimator: Option<ProgressEstimator>,
}

impl ActiveJob {
    fn record(&self) -> JobRecord {
        JobRecord {
            job_id: self.job.id.clone(),
            size_bytes: self.job.size_bytes,
            phase: self.phase,
            attempt_number: self.attempt,
            started_at: self.started_at,
            percent_complete: self.percent,
            next_wake_at: self.next_wake_at,
        }
    }
}

/// Single-worker submission scheduler.
///
/// All mutation happens through `&mut self` from one logical thread of
/// control; the collaborators are trait objects so tests can substitute a
/// manual clock, a scripted remote and an in-memory spool.
pub struct Scheduler {
    cfg: EngineConfig,
    queue: VecDeque<Job>,
    active: Option<ActiveJob>,
    last_outcome: Option<LastOutcome>,
    limiter: RateLimiter,
    policy: Box<dyn RetryPolicy>,
    remote: Box<dyn ScanService>,
    blobs: Box<dyn BlobStore>,
    credentials: Box<dyn CredentialStore>,
    observer: Box<dyn Observer>,
    clock: Box<dyn Clock>,
    store: StateStore,
}

impl Scheduler {
    /// Builds a scheduler from persisted state, restoring the queue, the
    /// rate window, the adaptive delay and any in-flight job.
    pub fn new(
        cfg: EngineConfig,
        store: StateStore,
        blobs: Box<dyn BlobStore>,
        remote: Box<dyn ScanService>,
        credentials: Box<dyn CredentialStore>,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        let persisted = store.load()?;
        let limiter = RateLimiter::restore(&persisted.rate_window);
        let mut policy = policy_from_config(&cfg.retry, cfg.upload_url_threshold);
        if let Some(delay_ms) = persisted.adaptive_delay_ms {
            policy.restore(delay_ms);
        }

        let active = persisted.current.map(|record| {
            info!(
                job = %record.job_id,
                phase = %record.phase,
                attempt = record.attempt_number,
                "resuming persisted job"
            );
            ActiveJob {
                job: Job {
                    id: record.job_id,
                    size_bytes: record.size_bytes,
                    // The queue entry is gone once a job goes active; the
                    // processing start stands in for the enqueue time.
                    enqueued_at: record.started_at,
                },
                attempt: record.attempt_number,
                phase: record.phase,
                started_at: record.started_at,
                percent: record.percent_complete,
                next_wake_at: record.next_wake_at,
                digest: None,
                estimator: None,
            }
        });
        if !persisted.queue.is_empty() {
            debug!(queued = persisted.queue.len(), "restored pending queue");
        }

        Ok(Scheduler {
            cfg,
            queue: persisted.queue.into(),
            active,
            last_outcome: persisted.last_outcome,
            limiter,
            policy,
            remote,
            blobs,
            credentials,
            observer: Box::new(NullObserver),
            clock,
            store,
        })
    }

    /// Appends a job to the queue. Empty artifacts and ids already queued
    /// or in flight are rejected with an `Error` event rather than a panic.
    pub fn enqueue(&mut self, job: Job) -> Result<()> {
        if job.size_bytes == 0 {
            warn!(job = %job.id, "rejected: artifact is empty");
            self.observer.push(Event::Error {
                job_id: job.id.clone(),
                message: "artifact is empty".to_string(),
            });
            return Err(ScanqError::Rejected(format!("{}: artifact is empty", job.id)));
        }
        let in_flight = self.active.as_ref().is_some_and(|a| a.job.id == job.id)
            || self.queue.iter().any(|queued| queued.id == job.id);
        if in_flight {
            warn!(job = %job.id, "rejected: id already queued or in flight");
            self.observer.push(Event::Error {
                job_id: job.id.clone(),
                message: "id already queued or in flight".to_string(),
            });
            return Err(ScanqError::Rejected(format!(
                "{}: id already queued or in flight",
                job.id
            )));
        }

        debug!(job = %job.id, size_bytes = job.size_bytes, "enqueued");
        self.queue.push_back(job);
        self.persist();
        Ok(())
    }

    /// Installs an observer and synchronously replays the current state so
    /// the new consumer reconstructs phase, percent and any pending wake.
    pub fn attach(&mut self, observer: Box<dyn Observer>) {
        self.observer = observer;
        self.replay();
    }

    /// Replaces the observer with one that discards everything.
    pub fn detach(&mut self) {
        self.observer = Box::new(NullObserver);
    }

    /// Advances the engine by one step. Called on a fixed cadence by the
    /// worker loop; a tick performs at most one remote call.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();

        if self.active.is_none() {
            self.try_dequeue(now);
            return;
        }

        if let Some(wake) = self.active.as_ref().and_then(|a| a.next_wake_at) {
            if now < wake {
                return;
            }
            self.resume(now);
            return;
        }

        self.ensure_estimator(now);
        self.emit_progress_sample(now);

        let phase = match self.active.as_ref() {
            Some(active) => active.phase,
            None => return,
        };
        match phase {
            Phase::Checking => self.run_checking(now),
            Phase::Uploading => self.run_uploading(now),
            // A retrying job always carries a wake time; recover if the
            // record somehow lost it.
            Phase::Retrying => self.enter_checking(now),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.queue.is_empty()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn tick_ms(&self) -> u64 {
        self.cfg.tick_ms
    }

    pub fn active_record(&self) -> Option<JobRecord> {
        self.active.as_ref().map(ActiveJob::record)
    }

    pub fn last_outcome(&self) -> Option<&LastOutcome> {
        self.last_outcome.as_ref()
    }

    fn try_dequeue(&mut self, now: u64) -> bool {
        let Some(job) = self.queue.pop_front() else {
            return false;
        };
        debug!(job = %job.id, size_bytes = job.size_bytes, "dequeued");
        self.policy.seed(job.size_bytes);
        self.active = Some(ActiveJob {
            job,
            attempt: 0,
            phase: Phase::Checking,
            started_at: now,
            percent: 0,
            next_wake_at: None,
            digest: None,
            estimator: None,
        });
        self.enter_checking(now);
        true
    }

    /// A due wake time re-enters the interrupted phase from its start:
    /// the same lookup is reissued, an upload restarts including the
    /// upload-URL fetch, and a retry begins its next attempt at checking.
    fn resume(&mut self, now: u64) {
        let phase = {
            let Some(active) = self.active.as_mut() else {
                return;
            };
            active.next_wake_at = None;
            if matches!(active.phase, Phase::Checking | Phase::Uploading) {
                active.estimator = None;
                active.percent = 0;
            }
            active.phase
        };
        match phase {
            Phase::Retrying => self.enter_checking(now),
            Phase::Checking | Phase::Uploading => self.persist(),
        }
    }

    fn enter_checking(&mut self, now: u64) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.phase = Phase::Checking;
        active.percent = 0;
        active.estimator = Some(ProgressEstimator::start(
            now,
            self.cfg.checking_budget_ms,
            self.cfg.easing,
        ));
        let job_id = active.job.id.clone();
        self.observer.push(Event::CheckingStarted { job_id });
        self.persist();
    }

    fn enter_uploading(&mut self, now: u64) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let budget_ms = self.cfg.upload_budget_ms(active.job.size_bytes);
        active.phase = Phase::Uploading;
        active.percent = 0;
        active.estimator = Some(ProgressEstimator::start(now, budget_ms, self.cfg.easing));
        let job_id = active.job.id.clone();
        self.observer.push(Event::UploadStarted { job_id });
        self.persist();
    }

    fn enter_wait(&mut self, resume_at: u64) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.next_wake_at = Some(resume_at);
        let job_id = active.job.id.clone();
        self.observer.push(Event::Waiting { job_id, resume_at });
        self.persist();
    }

    /// Rebuilds the phase estimator after a restore or a wait; the stored
    /// record does not carry it.
    fn ensure_estimator(&mut self, now: u64) {
        let budget_ms = match self.active.as_ref() {
            Some(active) if active.estimator.is_none() => match active.phase {
                Phase::Uploading => self.cfg.upload_budget_ms(active.job.size_bytes),
                Phase::Checking | Phase::Retrying => self.cfg.checking_budget_ms,
            },
            _ => return,
        };
        if let Some(active) = self.active.as_mut() {
            active.estimator = Some(ProgressEstimator::start(now, budget_ms, self.cfg.easing));
        }
    }

    fn emit_progress_sample(&mut self, now: u64) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some(estimator) = active.estimator else {
            return;
        };
        let sample = estimator.sample(now);
        if sample <= active.percent {
            return;
        }
        active.percent = sample;
        let job_id = active.job.id.clone();
        let phase = active.phase;
        self.observer.push(Event::Progress {
            job_id,
            percent: sample,
            phase,
        });
        self.persist();
    }

    fn run_checking(&mut self, now: u64) {
        let Some(job_id) = self.active.as_ref().map(|a| a.job.id.clone()) else {
            return;
        };

        let Some(creds) = self.credentials.get() else {
            self.attempt_failed(now, "no API credentials available");
            return;
        };

        let bytes = match self.blobs.get(job_id.as_str()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.finish_failed(now, "artifact content no longer available");
                return;
            }
            Err(e) => {
                self.attempt_failed(now, &format!("cannot read artifact: {e}"));
                return;
            }
        };

        let digest = match self.active.as_mut() {
            Some(active) => *active
                .digest
                .get_or_insert_with(|| ContentDigest::of(&bytes)),
            None => return,
        };

        match self.limiter.admit(now, self.request_limit(&creds)) {
            Admission::Allowed => {}
            Admission::Denied { retry_after_ms } => {
                self.enter_wait(now.saturating_add(retry_after_ms));
                return;
            }
        }
        self.persist();

        debug!(job = %job_id, digest = %digest, "looking up existing report");
        match self.remote.lookup(&creds, &digest) {
            Ok(Some(report)) => self.complete(now, report),
            Ok(None) => self.enter_uploading(now),
            Err(RemoteError::RateLimited { retry_after_ms }) => {
                self.server_rate_limited(now, retry_after_ms)
            }
            Err(e) => self.attempt_failed(now, &e.to_string()),
        }
    }

    fn run_uploading(&mut self, now: u64) {
        let Some((job_id, size_bytes)) = self
            .active
            .as_ref()
            .map(|a| (a.job.id.clone(), a.job.size_bytes))
        else {
            return;
        };

        let Some(creds) = self.credentials.get() else {
            self.attempt_failed(now, "no API credentials available");
            return;
        };

        let bytes = match self.blobs.get(job_id.as_str()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.finish_failed(now, "artifact content no longer available");
                return;
            }
            Err(e) => {
                self.attempt_failed(now, &format!("cannot read artifact: {e}"));
                return;
            }
        };

        let limit = self.request_limit(&creds);
        let url = if size_bytes > self.cfg.upload_url_threshold {
            // The URL fetch must leave a window slot for the upload that
            // follows; admitting it against the full quota can starve the
            // second request behind an endless chain of fresh fetches.
            let fetch_limit = limit.saturating_sub(1).max(1);
            match self.limiter.admit(now, fetch_limit) {
                Admission::Allowed => {}
                Admission::Denied { retry_after_ms } => {
                    self.enter_wait(now.saturating_add(retry_after_ms));
                    return;
                }
            }
            self.persist();
            match self.remote.upload_url(&creds) {
                Ok(url) => Some(url),
                Err(RemoteError::RateLimited { retry_after_ms }) => {
                    self.server_rate_limited(now, retry_after_ms);
                    return;
                }
                Err(e) => {
                    self.attempt_failed(now, &e.to_string());
                    return;
                }
            }
        } else {
            None
        };

        // Re-read the clock: the URL fetch was a real network round trip.
        let now = self.clock.now_ms();
        match self.limiter.admit(now, limit) {
            Admission::Allowed => {}
            Admission::Denied { retry_after_ms } => {
                self.enter_wait(now.saturating_add(retry_after_ms));
                return;
            }
        }
        self.persist();

        debug!(
            job = %job_id,
            size_bytes,
            direct = url.is_none(),
            "uploading artifact"
        );
        let result = self.post_with_progress(&creds, url.as_deref(), &bytes);
        let now = self.clock.now_ms();
        match result {
            Ok(report) => self.complete(now, report),
            Err(RemoteError::RateLimited { retry_after_ms }) => {
                self.server_rate_limited(now, retry_after_ms)
            }
            Err(e) => self.attempt_failed(now, &e.to_string()),
        }
    }

    /// Issues the upload request, sampling the time-driven estimator from
    /// the streaming hook so progress events keep flowing while the call
    /// blocks this thread.
    fn post_with_progress(
        &mut self,
        creds: &Credentials,
        url: Option<&str>,
        bytes: &[u8],
    ) -> std::result::Result<ReportRef, RemoteError> {
        let Scheduler {
            cfg,
            queue,
            active,
            last_outcome,
            limiter,
            policy,
            remote,
            observer,
            clock,
            store,
            ..
        } = self;

        let Some(active) = active.as_mut() else {
            let body = UploadBody::new(bytes);
            return match url {
                Some(url) => remote.upload_to(creds, url, body),
                None => remote.upload(creds, body),
            };
        };

        let throttle_ms = cfg.tick_ms;
        let mut last_sample_at = 0u64;
        let mut on_chunk = |_sent: u64| {
            let now = clock.now_ms();
            if now.saturating_sub(last_sample_at) < throttle_ms {
                return;
            }
            last_sample_at = now;
            let Some(estimator) = active.estimator else {
                return;
            };
            let sample = estimator.sample(now);
            if sample <= active.percent {
                return;
            }
            active.percent = sample;
            observer.push(Event::Progress {
                job_id: active.job.id.clone(),
                percent: sample,
                phase: active.phase,
            });
            let doc = PersistedState {
                current: Some(active.record()),
                queue: queue.iter().cloned().collect(),
                rate_window: limiter.timestamps(),
                adaptive_delay_ms: policy.persisted_delay_ms(),
                last_outcome: last_outcome.clone(),
            };
            if let Err(e) = store.save(&doc) {
                warn!(error = %e, "failed to persist progress");
            }
        };

        let body = UploadBody::with_chunk_hook(bytes, &mut on_chunk);
        match url {
            Some(url) => remote.upload_to(creds, url, body),
            None => remote.upload(creds, body),
        }
    }

    /// Server-side 429: the admitted slot is given back so the rejected
    /// request does not count twice, the adaptive delay takes its penalty,
    /// and the job waits without consuming a retry.
    fn server_rate_limited(&mut self, now: u64, retry_after_ms: Option<u64>) {
        self.limiter.rollback_last();
        self.policy.note_rate_limited();
        let delay_ms = retry_after_ms.unwrap_or_else(|| self.policy.current_delay_ms());
        if let Some(active) = self.active.as_ref() {
            warn!(job = %active.job.id, delay_ms, "server reported rate limit; backing off");
        }
        self.enter_wait(now.saturating_add(delay_ms));
    }

    fn attempt_failed(&mut self, now: u64, message: &str) {
        let attempt = match self.active.as_ref() {
            Some(active) => active.attempt,
            None => return,
        };
        match self.policy.on_failure(attempt) {
            RetryDecision::Retry { delay_ms } => {
                let resume_at = now.saturating_add(delay_ms);
                let Some(active) = self.active.as_mut() else {
                    return;
                };
                active.attempt += 1;
                active.phase = Phase::Retrying;
                active.next_wake_at = Some(resume_at);
                let job_id = active.job.id.clone();
                let attempt = active.attempt;
                warn!(
                    job = %job_id,
                    attempt,
                    resume_in_ms = delay_ms,
                    "attempt failed: {message}"
                );
                self.observer.push(Event::Retry {
                    job_id,
                    attempt,
                    max_retries: self.cfg.retry.max_retries,
                    resume_at,
                });
                self.persist();
            }
            RetryDecision::GiveUp => {
                self.finish_failed(now, &format!("retries exhausted: {message}"));
            }
        }
    }

    fn complete(&mut self, now: u64, report: ReportRef) {
        let Some(active) = self.active.take() else {
            return;
        };
        let job_id = active.job.id;
        info!(job = %job_id, report = %report, "scan report available");
        self.observer.push(Event::Progress {
            job_id: job_id.clone(),
            percent: 100,
            phase: active.phase,
        });
        self.observer.push(Event::Completed {
            job_id: job_id.clone(),
            report: report.clone(),
        });
        if let Err(e) = self.blobs.delete(job_id.as_str()) {
            warn!(job = %job_id, error = %e, "failed to remove spooled artifact");
        }
        self.last_outcome = Some(LastOutcome::Completed {
            job_id,
            report: report.0,
            at: now,
        });
        self.persist();
        self.try_dequeue(now);
    }

    fn finish_failed(&mut self, now: u64, message: &str) {
        let Some(active) = self.active.take() else {
            return;
        };
        let job_id = active.job.id;
        warn!(job = %job_id, "giving up: {message}");
        self.observer.push(Event::Error {
            job_id: job_id.clone(),
            message: message.to_string(),
        });
        if let Err(e) = self.blobs.delete(job_id.as_str()) {
            warn!(job = %job_id, error = %e, "failed to remove spooled artifact");
        }
        self.last_outcome = Some(LastOutcome::Failed {
            job_id,
            message: message.to_string(),
            at: now,
        });
        self.persist();
        self.try_dequeue(now);
    }

    fn replay(&self) {
        if let Some(active) = &self.active {
            let job_id = active.job.id.clone();
            match active.phase {
                Phase::Checking => self.observer.push(Event::CheckingStarted {
                    job_id: job_id.clone(),
                }),
                Phase::Uploading => self.observer.push(Event::UploadStarted {
                    job_id: job_id.clone(),
                }),
                Phase::Retrying => {}
            }
            self.observer.push(Event::Progress {
                job_id: job_id.clone(),
                percent: active.percent,
                phase: active.phase,
            });
            match (active.phase, active.next_wake_at) {
                (Phase::Retrying, wake) => self.observer.push(Event::Retry {
                    job_id,
                    attempt: active.attempt,
                    max_retries: self.cfg.retry.max_retries,
                    resume_at: wake.unwrap_or_default(),
                }),
                (_, Some(resume_at)) => {
                    self.observer.push(Event::Waiting { job_id, resume_at })
                }
                (_, None) => {}
            }
        } else if let Some(outcome) = &self.last_outcome {
            match outcome {
                LastOutcome::Completed { job_id, report, .. } => {
                    self.observer.push(Event::Completed {
                        job_id: job_id.clone(),
                        report: ReportRef(report.clone()),
                    })
                }
                LastOutcome::Failed {
                    job_id, message, ..
                } => self.observer.push(Event::Error {
                    job_id: job_id.clone(),
                    message: message.clone(),
                }),
            }
        }
    }

    fn request_limit(&self, creds: &Credentials) -> usize {
        if creds.premium {
            self.cfg.premium_requests_per_minute
        } else {
            self.cfg.requests_per_minute
        }
    }

    fn persist(&self) {
        let doc = PersistedState {
            current: self.active.as_ref().map(ActiveJob::record),
            queue: self.queue.iter().cloned().collect(),
            rate_window: self.limiter.timestamps(),
            adaptive_delay_ms: self.policy.persisted_delay_ms(),
            last_outcome: self.last_outcome.clone(),
        };
        if let Err(e) = self.store.save(&doc) {
            warn!(error = %e, "failed to persist queue state");
        }
    }
}
