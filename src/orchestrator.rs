//! End-to-end remediation state machine
//!
//! Owns one Job per error being worked, enforces the concurrency bound,
//! polls the listener for new auto-fixable work, and drives each job
//! through test-writing, patching, and PR creation. Stage failures are
//! absorbed here: the job is marked failed, the record returns to the
//! unprocessed queue, and the poll loop keeps running.
//!
//! Two hardenings over the naive requeue design: a per-error attempt
//! counter with exponential backoff (so a persistently failing error
//! cannot hammer the completion service forever), and a per-target-path
//! mutex (so two jobs never mutate the same file concurrently).

use crate::bus::{BusEvent, EventBus, TOPIC_ERRORS, TOPIC_FIX_COMPLETED};
use crate::config::Config;
use crate::error::RemedyError;
use crate::listener::{ErrorListener, ErrorRecord};
use crate::pipeline::{
    PatchAgent, PatchResult, PrAgent, PullRequestResult, ReproductionTest, TestWriter,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Doublings after which the retry backoff stops growing.
const MAX_BACKOFF_SHIFT: u32 = 6;

/// State-machine position of one remediation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    TestWriting,
    Patching,
    PrCreating,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One in-flight (or historical) remediation attempt for a single error.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub error_id: Uuid,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub test_result: Option<ReproductionTest>,
    pub patch_result: Option<PatchResult>,
    pub pr_result: Option<PullRequestResult>,
    pub error: Option<String>,
}

impl Job {
    fn new(error_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            error_id,
            status: JobStatus::TestWriting,
            started_at: Utc::now(),
            test_result: None,
            patch_result: None,
            pr_result: None,
            error: None,
        }
    }
}

/// Aggregate counts exposed to the surrounding platform.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub unprocessed_errors: usize,
    pub auto_fixable_errors: usize,
    pub processing_errors: usize,
    pub resolved_errors: usize,
    pub is_running: bool,
}

#[derive(Debug, Clone)]
struct AttemptState {
    count: u32,
    next_eligible: DateTime<Utc>,
}

/// True when an error may be picked up by the poll loop: either never
/// attempted, or under the attempt cap with its backoff window elapsed.
fn eligible_for_retry(
    state: Option<&AttemptState>,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> bool {
    match state {
        None => true,
        Some(s) => s.count < max_attempts && now >= s.next_eligible,
    }
}

struct Inner {
    listener: Arc<ErrorListener>,
    bus: Arc<EventBus>,
    test_writer: TestWriter,
    patch_agent: PatchAgent,
    pr_agent: PrAgent,
    config: Config,
    jobs: Mutex<HashMap<Uuid, Job>>,
    attempts: Mutex<HashMap<Uuid, AttemptState>>,
    path_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    paused: AtomicBool,
    running: AtomicBool,
}

pub struct Orchestrator {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        listener: Arc<ErrorListener>,
        bus: Arc<EventBus>,
        test_writer: TestWriter,
        patch_agent: PatchAgent,
        pr_agent: PrAgent,
        config: Config,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                listener,
                bus,
                test_writer,
                patch_agent,
                pr_agent,
                config,
                jobs: Mutex::new(HashMap::new()),
                attempts: Mutex::new(HashMap::new()),
                path_locks: Mutex::new(HashMap::new()),
                paused: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to the error topic and start the poll loop. Idempotent:
    /// a second call while running is a no-op.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut tasks = self.tasks.lock().expect("task lock poisoned");

        // Ingestion: bus notifications into the listener.
        let inner = self.inner.clone();
        let mut rx = inner.bus.subscribe(TOPIC_ERRORS);
        tasks.push(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(BusEvent::Error(event)) => inner.listener.report(&event),
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "error listener lagged behind the bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        // Poll loop: pick up auto-fixable work, bounded by max jobs.
        if self.inner.config.auto_process {
            let inner = self.inner.clone();
            let interval = Duration::from_millis(inner.config.poll_interval_ms.max(100));
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    Inner::poll_once(&inner).await;
                }
            }));
        }

        info!(
            poll_interval_ms = self.inner.config.poll_interval_ms,
            max_jobs = self.inner.config.max_concurrent_jobs,
            auto = self.inner.config.auto_process,
            "orchestrator started"
        );
    }

    /// Stop accepting new work. In-flight jobs continue to completion.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    /// Pause plus release the bus subscription and poll loop.
    pub fn stop(&self) {
        self.pause();
        self.inner.running.store(false, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().expect("task lock poisoned");
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("orchestrator stopped");
    }

    /// One scheduling pass, also driven internally by the poll loop.
    pub async fn poll_once(&self) {
        Inner::poll_once(&self.inner).await;
    }

    /// Start (or join) remediation for one error. Idempotent per error:
    /// if a job is already in flight for this id, that job is returned and
    /// no second pipeline starts. Manual calls work even while paused.
    pub fn process_error(&self, error_id: Uuid) -> Result<Job> {
        Inner::process_error(&self.inner, error_id)
    }

    pub fn status(&self) -> StatusSnapshot {
        let unprocessed = self.inner.listener.list_unprocessed();
        let auto_fixable = unprocessed
            .iter()
            .filter(|r| self.inner.listener.is_auto_fixable(r))
            .count();
        StatusSnapshot {
            unprocessed_errors: unprocessed.len(),
            auto_fixable_errors: auto_fixable,
            processing_errors: self.inner.listener.list_processing().len(),
            resolved_errors: self.inner.listener.list_resolved().len(),
            is_running: self.inner.running.load(Ordering::SeqCst),
        }
    }

    /// Job history, newest first.
    pub fn jobs(&self) -> Vec<Job> {
        let jobs = self.inner.jobs.lock().expect("job lock poisoned");
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all
    }

    pub fn job(&self, error_id: Uuid) -> Option<Job> {
        self.inner
            .jobs
            .lock()
            .expect("job lock poisoned")
            .get(&error_id)
            .cloned()
    }
}

impl Inner {
    async fn poll_once(inner: &Arc<Inner>) {
        if inner.paused.load(Ordering::SeqCst) {
            return;
        }

        let now = Utc::now();
        let candidates: Vec<ErrorRecord> = inner
            .listener
            .list_unprocessed()
            .into_iter()
            .filter(|r| inner.listener.is_auto_fixable(r))
            .filter(|r| {
                let attempts = inner.attempts.lock().expect("attempt lock poisoned");
                eligible_for_retry(attempts.get(&r.id), inner.config.max_attempts, now)
            })
            .collect();

        if candidates.is_empty() {
            return;
        }
        debug!(count = candidates.len(), "poll found auto-fixable errors");

        for record in candidates {
            if inner.active_jobs() >= inner.config.max_concurrent_jobs {
                debug!("concurrency bound reached, deferring remaining errors");
                break;
            }
            if let Err(e) = Self::process_error(inner, record.id) {
                warn!(id = %record.id, error = %e, "failed to start job");
            }
        }
    }

    fn process_error(inner: &Arc<Inner>, error_id: Uuid) -> Result<Job> {
        let record = inner
            .listener
            .get(error_id)
            .ok_or_else(|| anyhow::anyhow!("unknown error id {}", error_id))?;

        // At most one live job per error id.
        let job = {
            let mut jobs = inner.jobs.lock().expect("job lock poisoned");
            if let Some(existing) = jobs.get(&error_id) {
                if !existing.status.is_terminal() {
                    return Ok(existing.clone());
                }
            }
            let job = Job::new(error_id);
            jobs.insert(error_id, job.clone());
            job
        };

        inner.listener.mark_processing(error_id);
        info!(id = %error_id, job = %job.id, kind = %record.error_kind, "job started");

        let inner = inner.clone();
        tokio::spawn(async move {
            Inner::run_pipeline(inner, record).await;
        });

        Ok(job)
    }

    async fn run_pipeline(inner: Arc<Inner>, record: ErrorRecord) {
        let target = resolve_target_file(&record, &inner.config.default_target_file);

        // Serialize jobs that resolved to the same file.
        let lock = inner.path_lock(&target);
        let _guard = lock.lock_owned().await;

        match Self::execute_stages(&inner, &record, &target).await {
            Ok(pr) => {
                let summary = format!("fixed via {}", pr.url);
                inner.update_job(record.id, |job| {
                    job.status = JobStatus::Completed;
                    job.pr_result = Some(pr.clone());
                });
                inner.listener.mark_resolved(record.id, &summary);
                inner.attempts.lock().expect("attempt lock poisoned").remove(&record.id);
                inner.bus.publish(
                    TOPIC_FIX_COMPLETED,
                    BusEvent::FixCompleted {
                        error_id: record.id,
                        pr_url: pr.url.clone(),
                    },
                );
                info!(id = %record.id, url = %pr.url, "job completed");
            }
            Err(e) => {
                let reason = e.to_string();
                inner.update_job(record.id, |job| {
                    job.status = JobStatus::Failed;
                    job.error = Some(reason.clone());
                });
                inner.listener.mark_failed(record.id, &reason);
                inner.record_failure(record.id);
                warn!(id = %record.id, kind = e.kind(), error = %reason, "job failed");
            }
        }
    }

    async fn execute_stages(
        inner: &Inner,
        record: &ErrorRecord,
        target: &Path,
    ) -> std::result::Result<PullRequestResult, RemedyError> {
        let test = inner.test_writer.generate(record, target).await?;
        inner.update_job(record.id, |job| job.test_result = Some(test.clone()));
        if !test.reproduces_error {
            return Err(RemedyError::Unreproduced {
                detail: "reproduction not confirmed after corrective retry".to_string(),
            });
        }

        inner.update_job(record.id, |job| job.status = JobStatus::Patching);
        let patch = inner.patch_agent.generate_fix(record, &test, target).await?;
        inner.update_job(record.id, |job| {
            job.status = JobStatus::PrCreating;
            job.patch_result = Some(patch.clone());
        });

        inner.pr_agent.submit_fix(record, &patch, &test).await
    }

    fn active_jobs(&self) -> usize {
        self.jobs
            .lock()
            .expect("job lock poisoned")
            .values()
            .filter(|job| !job.status.is_terminal())
            .count()
    }

    fn update_job(&self, error_id: Uuid, apply: impl FnOnce(&mut Job)) {
        let mut jobs = self.jobs.lock().expect("job lock poisoned");
        if let Some(job) = jobs.get_mut(&error_id) {
            apply(job);
        }
    }

    fn path_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.path_locks.lock().expect("path lock poisoned");
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn record_failure(&self, error_id: Uuid) {
        let mut attempts = self.attempts.lock().expect("attempt lock poisoned");
        let state = attempts.entry(error_id).or_insert(AttemptState {
            count: 0,
            next_eligible: Utc::now(),
        });
        state.count += 1;
        let shift = (state.count - 1).min(MAX_BACKOFF_SHIFT);
        let delay = self.config.retry_backoff_secs.saturating_mul(1 << shift);
        state.next_eligible = Utc::now() + chrono::Duration::seconds(delay as i64);
        debug!(
            id = %error_id,
            attempt = state.count,
            backoff_secs = delay,
            "failure recorded for retry backoff"
        );
    }
}

/// Target file for remediation: the file named by the innermost stack
/// frame, or the configured fallback when the record has no trace.
fn resolve_target_file(record: &ErrorRecord, fallback: &Path) -> PathBuf {
    record
        .top_frame()
        .map(|frame| PathBuf::from(&frame.file))
        .unwrap_or_else(|| fallback.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{Severity, StackFrame};

    fn record_with_trace(trace: Vec<StackFrame>) -> ErrorRecord {
        ErrorRecord {
            id: Uuid::new_v4(),
            source: "svc".to_string(),
            error_kind: "TypeError".to_string(),
            message: "boom".to_string(),
            stack_trace: trace,
            context: None,
            severity: Severity::Medium,
            reproducible: true,
            first_seen: Utc::now(),
            seen_count: 1,
            resolution: None,
        }
    }

    #[test]
    fn test_resolve_target_uses_top_frame() {
        let record = record_with_trace(vec![
            StackFrame {
                file: "src/calc.ts".to_string(),
                line: 10,
                column: 5,
                function: Some("compute".to_string()),
            },
            StackFrame {
                file: "src/index.ts".to_string(),
                line: 3,
                column: 1,
                function: None,
            },
        ]);
        let target = resolve_target_file(&record, Path::new("src/main.rs"));
        assert_eq!(target, PathBuf::from("src/calc.ts"));
    }

    #[test]
    fn test_resolve_target_falls_back_without_trace() {
        let record = record_with_trace(Vec::new());
        let target = resolve_target_file(&record, Path::new("src/main.rs"));
        assert_eq!(target, PathBuf::from("src/main.rs"));
    }

    #[test]
    fn test_retry_eligibility_fresh_error() {
        assert!(eligible_for_retry(None, 3, Utc::now()));
    }

    #[test]
    fn test_retry_eligibility_respects_backoff_window() {
        let now = Utc::now();
        let state = AttemptState {
            count: 1,
            next_eligible: now + chrono::Duration::seconds(30),
        };
        assert!(!eligible_for_retry(Some(&state), 3, now));
        assert!(eligible_for_retry(
            Some(&state),
            3,
            now + chrono::Duration::seconds(31)
        ));
    }

    #[test]
    fn test_retry_eligibility_caps_attempts() {
        let now = Utc::now();
        let state = AttemptState {
            count: 3,
            next_eligible: now - chrono::Duration::seconds(1),
        };
        assert!(!eligible_for_retry(Some(&state), 3, now));
    }

    #[test]
    fn test_job_status_terminality() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::TestWriting.is_terminal());
        assert!(!JobStatus::Patching.is_terminal());
        assert!(!JobStatus::PrCreating.is_terminal());
    }

    #[test]
    fn test_job_status_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::TestWriting).unwrap(),
            "\"test-writing\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::PrCreating).unwrap(),
            "\"pr-creating\""
        );
    }
}
