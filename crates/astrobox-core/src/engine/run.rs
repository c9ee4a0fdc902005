//! Running jobs: output handling, exit handling, retries and retention.

use chrono::Utc;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::state::{EngineState, JobEntry};
use super::Inner;
use crate::control;
use crate::job::{JobId, JobStatus, JobUpdate};
use crate::retry::RetryDecision;
use crate::supervisor::{classify_line, read_lines, OutputLine};
use crate::url_model::title_from_path;

/// How long output is drained after the process exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {signal}");
        }
    }
    "unknown exit".to_string()
}

impl Inner {
    /// Pump the process output into the job and wait for it to exit or for
    /// a stop request.
    pub(crate) async fn supervise(
        self: Arc<Self>,
        id: JobId,
        run_id: u64,
        mut child: Child,
        stop: oneshot::Receiver<()>,
    ) {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let reader_inner = Arc::clone(&self);
        let reader = tokio::spawn(async move {
            read_lines(stdout, stderr, |line| reader_inner.handle_output(id, run_id, line)).await;
        });
        let reader_abort = reader.abort_handle();

        let outcome = tokio::select! {
            status = child.wait() => status,
            // a dropped sender counts as a stop request
            _ = stop => {
                tracing::debug!(job_id = %id, "stopping extractor");
                control::terminate(&mut child, self.cfg.kill_grace()).await
            }
        };

        match tokio::time::timeout(DRAIN_TIMEOUT, reader).await {
            Ok(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Ok(_) => {}
            Err(_) => reader_abort.abort(),
        }
        self.finalize(id, run_id, outcome);
    }

    /// Await the supervisor of run `run_id`; if it panicked, fail the job,
    /// release its units and raise an engine fault.
    pub(crate) fn watch_run(
        self: &Arc<Self>,
        id: JobId,
        run_id: u64,
        task: JoinHandle<()>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let Err(e) = task.await else {
                return;
            };
            if !e.is_panic() {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                inner.abandon_run(id, run_id);
            }
        })
    }

    fn abandon_run(self: &Arc<Self>, id: JobId, run_id: u64) {
        tracing::error!(job_id = %id, run_id, "job supervisor panicked");
        let run = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let run = match st.jobs.get_mut(&id) {
                Some(entry) if entry.run.as_ref().map(|r| r.run_id) == Some(run_id) => {
                    let run = entry.run.take();
                    entry.task = None;
                    entry.job.status = JobStatus::Error;
                    entry.job.resource_units = 0;
                    entry.job.finished_at = Some(Utc::now());
                    entry.emit(
                        &self.store,
                        JobUpdate {
                            resource_units: Some(0),
                            ..JobUpdate::status(
                                JobStatus::Error,
                                "[error] Supervisor failed unexpectedly.",
                            )
                        },
                    );
                    entry.persist(&self.store, true);
                    self.schedule_cleanup(entry);
                    run
                }
                _ => None,
            };
            st.active.remove(&id);
            run
        };
        if let Some(run) = run {
            run.stop_and_release();
        }
        self.raise_fault(format!("supervisor for job {id} panicked"));
        self.tick();
    }

    /// Record the first fault; later ones are only logged.
    pub(crate) fn raise_fault(&self, reason: String) {
        self.faults.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    /// Apply one output line of run `run_id` to the job.
    pub(crate) fn handle_output(&self, id: JobId, run_id: u64, line: String) {
        let mut st = self.state.lock();
        let Some(entry) = st.jobs.get_mut(&id) else {
            return;
        };
        if entry.run.as_ref().map(|r| r.run_id) != Some(run_id) {
            return;
        }

        match classify_line(&line) {
            OutputLine::Destination(path) => {
                let title = title_from_path(&path);
                entry.job.file_path = Some(path.clone());
                entry.job.title = title.clone();
                entry.emit(
                    &self.store,
                    JobUpdate {
                        file_path: Some(path),
                        title: Some(title),
                        ..JobUpdate::log(line)
                    },
                );
                entry.persist(&self.store, true);
            }
            OutputLine::Progress(p) => {
                let job = &mut entry.job;
                job.progress = job.progress.max(p.percent);
                job.speed = p.speed.clone();
                job.eta = p.eta.clone();
                if let Some(size) = &p.size {
                    job.size = size.clone();
                }
                if let Some(v) = p.speed_value() {
                    job.push_speed_sample(v);
                }
                let update = JobUpdate {
                    progress: Some(job.progress),
                    speed: Some(job.speed.clone()),
                    eta: Some(job.eta.clone()),
                    size: Some(job.size.clone()),
                    speed_history: Some(job.speed_history.iter().copied().collect()),
                    ..JobUpdate::log(line)
                };
                entry.emit(&self.store, update);
                entry.persist(&self.store, false);
            }
            OutputLine::Log => entry.emit(&self.store, JobUpdate::log(line)),
        }
    }

    /// Settle run `run_id` after its process exited.
    ///
    /// If cancel or shutdown already took the run handle they own the job's
    /// final state and nothing happens here.
    fn finalize(self: &Arc<Self>, id: JobId, run_id: u64, outcome: io::Result<ExitStatus>) {
        {
            let mut st = self.state.lock();
            let Some(entry) = st.jobs.get_mut(&id) else {
                return;
            };
            if entry.run.as_ref().map(|r| r.run_id) != Some(run_id) {
                return;
            }
            // releases the units
            entry.run = None;
            entry.task = None;
            entry.job.resource_units = 0;
            st.active.remove(&id);

            match outcome {
                Ok(status) if status.success() => self.complete(&mut st, id),
                Ok(status) => {
                    let reason = describe_exit(&status);
                    tracing::warn!(job_id = %id, "extractor failed: {reason}");
                    self.fail_attempt(&mut st, id, format!("[error] Download failed ({reason})."));
                }
                Err(e) => {
                    tracing::warn!(job_id = %id, "waiting for extractor failed: {e}");
                    self.fail_attempt(&mut st, id, format!("[error] Extractor wait failed: {e}"));
                }
            }
        }
        self.tick();
    }

    fn complete(self: &Arc<Self>, st: &mut EngineState, id: JobId) {
        let Some(entry) = st.jobs.get_mut(&id) else {
            return;
        };
        let job = &mut entry.job;
        job.status = JobStatus::Completed;
        job.progress = 100.0;
        job.eta = "00:00".to_string();
        job.finished_at = Some(Utc::now());
        let update = JobUpdate {
            progress: Some(100.0),
            eta: Some(job.eta.clone()),
            file_path: job.file_path.clone(),
            resource_units: Some(0),
            ..JobUpdate::status(JobStatus::Completed, "[done] Download completed.")
        };
        entry.emit(&self.store, update);
        entry.persist(&self.store, true);
        tracing::info!(job_id = %id, file = ?entry.job.file_path, "job completed");
        self.schedule_cleanup(entry);
    }

    /// Record a failed run and either schedule the next attempt or fail the job.
    pub(crate) fn fail_attempt(self: &Arc<Self>, st: &mut EngineState, id: JobId, reason: String) {
        let Some(entry) = st.jobs.get_mut(&id) else {
            return;
        };
        if entry.job.status == JobStatus::Cancelled {
            return;
        }
        entry.job.attempts += 1;
        entry.job.resource_units = 0;
        let attempt = entry.job.attempts;

        match self.retry.decide(attempt) {
            RetryDecision::RetryAfter(delay) => {
                entry.job.status = JobStatus::Queued;
                entry.job.progress = 0.0;
                entry.emit(&self.store, JobUpdate::log(reason));
                entry.emit(
                    &self.store,
                    JobUpdate {
                        progress: Some(0.0),
                        resource_units: Some(0),
                        ..JobUpdate::status(
                            JobStatus::Queued,
                            format!(
                                "[retry] Attempt {attempt} scheduled in {}s.",
                                delay.as_secs_f64()
                            ),
                        )
                    },
                );
                entry.persist(&self.store, true);
                tracing::info!(job_id = %id, attempt, delay_ms = delay.as_millis() as u64, "retry scheduled");

                let weak = Arc::downgrade(self);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.enqueue(id);
                    }
                });
            }
            RetryDecision::NoRetry => {
                entry.job.status = JobStatus::Error;
                entry.job.finished_at = Some(Utc::now());
                entry.emit(
                    &self.store,
                    JobUpdate {
                        resource_units: Some(0),
                        ..JobUpdate::status(JobStatus::Error, reason)
                    },
                );
                entry.persist(&self.store, true);
                tracing::warn!(job_id = %id, attempts = attempt, "job failed");
                self.schedule_cleanup(entry);
            }
        }
    }

    /// Drop a terminal job from the registry after the retention period.
    pub(crate) fn schedule_cleanup(self: &Arc<Self>, entry: &mut JobEntry) {
        entry.cancel_cleanup();
        let id = entry.job.id;
        let weak = Arc::downgrade(self);
        let retention = self.cfg.job_retention();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut st = inner.state.lock();
            if st.jobs.get(&id).is_some_and(|e| e.job.status.is_terminal()) {
                st.jobs.remove(&id);
                tracing::debug!(job_id = %id, "job removed from registry");
            }
        });
        entry.cleanup = Some(handle.abort_handle());
    }
}
