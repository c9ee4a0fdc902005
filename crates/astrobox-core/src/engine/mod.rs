//! Job engine: the in-memory registry and everything that mutates it.
//!
//! One [`Engine`] owns the job registry, the waiting queue, the unit ledger
//! and the running extractor processes. All registry state sits behind a
//! single lock that is never held across an await; long work (process I/O,
//! DNS, timers) runs in spawned tasks that re-enter through the lock.
//!
//! Lifecycle of a job:
//! `paused -> queued -> downloading -> completed | error | cancelled`, with
//! `downloading -> queued` for scheduled retries.

mod error;
mod run;
mod state;
mod tick;
mod types;

#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use types::{JobStream, SubmitReceipt, SubmitRequest, SystemReport};

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::analyze::{AnalyzeReport, Analyzer};
use crate::config::{AppConfig, ResolvedPaths};
use crate::job::{validate_format, Job, JobId, JobSnapshot, JobStatus, JobUpdate, ValidationError};
use crate::origin_guard::{HostResolver, OriginGuard, SystemResolver};
use crate::retry::RetryPolicy;
use crate::scheduler::{HostSampler, ResourceMonitor, SysinfoSampler, UnitLedger};
use crate::store::{HistoryFilter, JobRecord, JobStore};
use crate::supervisor::ExtractorCommand;
use crate::tickets::{Ticket, TicketIssuer, TicketScope};
use crate::url_model::strip_quotes;
use state::{EngineState, JobEntry, RunHandle};

/// Most URLs accepted by one analyze call.
pub const MAX_ANALYZE_URLS: usize = 40;

/// Log lines returned with a history item.
const HISTORY_LOG_LINES: usize = 200;

pub(crate) struct Inner {
    cfg: AppConfig,
    paths: ResolvedPaths,
    state: Mutex<EngineState>,
    ledger: Arc<UnitLedger>,
    monitor: ResourceMonitor,
    guard: OriginGuard,
    tickets: TicketIssuer,
    store: JobStore,
    retry: RetryPolicy,
    extractor: ExtractorCommand,
    analyzer: Analyzer,
    faults: watch::Sender<Option<String>>,
}

/// Cloneable handle to the engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Engine sampling the real host and resolving through the system resolver.
    pub fn new(cfg: AppConfig, paths: ResolvedPaths, store: JobStore) -> Self {
        Self::with_collaborators(
            cfg,
            paths,
            store,
            Arc::new(SysinfoSampler::new()),
            Arc::new(SystemResolver),
        )
    }

    pub fn with_collaborators(
        cfg: AppConfig,
        paths: ResolvedPaths,
        store: JobStore,
        sampler: Arc<dyn HostSampler>,
        resolver: Arc<dyn HostResolver>,
    ) -> Self {
        let cfg = cfg.normalized();
        let inner = Inner {
            monitor: ResourceMonitor::new(sampler, &cfg.resources),
            guard: OriginGuard::new(resolver, Duration::from_millis(cfg.guard.dns_cache_ttl_ms)),
            tickets: TicketIssuer::new(cfg.ticket_ttl()),
            retry: RetryPolicy::from_config(&cfg.retry),
            extractor: ExtractorCommand::from_config(&cfg.extractor),
            analyzer: Analyzer::from_config(&cfg.extractor),
            ledger: UnitLedger::new(),
            state: Mutex::new(EngineState::default()),
            faults: watch::Sender::new(None),
            store,
            paths,
            cfg,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.cfg
    }

    pub fn paths(&self) -> &ResolvedPaths {
        &self.inner.paths
    }

    pub fn store(&self) -> &JobStore {
        &self.inner.store
    }

    /// Changes once when the engine hits an unrecoverable fault.
    pub fn faults(&self) -> watch::Receiver<Option<String>> {
        self.inner.faults.subscribe()
    }

    pub fn fault(&self) -> Option<String> {
        self.inner.faults.borrow().clone()
    }

    /// Report a fault raised outside the engine, such as a panic elsewhere
    /// in the process.
    pub fn report_fault(&self, reason: impl Into<String>) {
        self.inner.raise_fault(reason.into());
    }

    /// Validate and register a download job. Nothing is created on error.
    pub async fn submit(&self, req: SubmitRequest) -> Result<SubmitReceipt, EngineError> {
        if self.inner.state.lock().shutting_down {
            return Err(EngineError::ShuttingDown);
        }
        let url = req.url.trim().to_string();
        url::Url::parse(&url).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;
        if let Some(format) = &req.format {
            validate_format(format)?;
        }
        let options = req.options.unwrap_or_default();
        options.validate()?;
        self.inner.guard.validate(&url).await?;

        let format = req
            .format
            .unwrap_or_else(|| self.inner.cfg.extractor.default_format.clone());
        let job = Job::new(url, format, options);
        let id = job.id;
        let status = job.status;
        let cost = self.inner.monitor.job_cost(&job.options);
        let first_line = job.logs.back().cloned();

        {
            let mut st = self.inner.state.lock();
            if st.shutting_down {
                return Err(EngineError::ShuttingDown);
            }
            let mut entry = JobEntry::new(job);
            entry.persist(&self.inner.store, true);
            if let Some(line) = first_line {
                self.inner.store.append_log(id, &line);
            }
            st.jobs.insert(id, entry);
        }
        tracing::info!(job_id = %id, status = %status, units = cost, "job submitted");

        if status == JobStatus::Queued {
            self.inner.enqueue(id);
        }
        Ok(SubmitReceipt {
            id,
            status,
            resource_units: cost,
            resource_budget_units: self.inner.monitor.current_budget().dynamic_unit_budget,
        })
    }

    /// Move a paused job to the queue. Queued, running and completed jobs are
    /// left alone; cancelled and failed jobs cannot be started.
    pub fn start(&self, id: JobId) -> Result<JobStatus, EngineError> {
        {
            let mut st = self.inner.state.lock();
            if st.shutting_down {
                return Err(EngineError::ShuttingDown);
            }
            let entry = st.jobs.get_mut(&id).ok_or(EngineError::NotFound)?;
            match entry.job.status {
                JobStatus::Paused => {
                    entry.job.status = JobStatus::Queued;
                    entry.emit(
                        &self.inner.store,
                        JobUpdate::status(JobStatus::Queued, "[queue] Job started."),
                    );
                    entry.persist(&self.inner.store, true);
                }
                s @ (JobStatus::Queued | JobStatus::Downloading | JobStatus::Completed) => {
                    return Ok(s)
                }
                s @ (JobStatus::Cancelled | JobStatus::Error) => {
                    return Err(EngineError::CannotStart(s))
                }
            }
        }
        self.inner.enqueue(id);
        Ok(JobStatus::Queued)
    }

    /// Cancel a job in any non-terminal state. Repeating a cancel is a no-op.
    pub fn cancel(&self, id: JobId) -> Result<(), EngineError> {
        let run = {
            let mut st = self.inner.state.lock();
            let status = st
                .jobs
                .get(&id)
                .map(|e| e.job.status)
                .ok_or(EngineError::NotFound)?;
            match status {
                JobStatus::Cancelled => return Ok(()),
                JobStatus::Completed | JobStatus::Error => {
                    return Err(EngineError::NotCancellable(status))
                }
                _ => {}
            }
            st.queue.remove(&id);
            st.active.remove(&id);
            let Some(entry) = st.jobs.get_mut(&id) else {
                return Err(EngineError::NotFound);
            };
            let run = entry.run.take();
            entry.job.status = JobStatus::Cancelled;
            entry.job.resource_units = 0;
            entry.job.finished_at = Some(Utc::now());
            entry.emit(
                &self.inner.store,
                JobUpdate {
                    resource_units: Some(0),
                    ..JobUpdate::status(JobStatus::Cancelled, "[cancel] Job cancelled.")
                },
            );
            entry.persist(&self.inner.store, true);
            self.inner.schedule_cleanup(entry);
            run
        };
        tracing::info!(job_id = %id, running = run.is_some(), "job cancelled");
        if let Some(run) = run {
            run.stop_and_release();
        }
        self.inner.tick();
        Ok(())
    }

    pub fn snapshot(&self, id: JobId) -> Option<JobSnapshot> {
        self.inner.state.lock().jobs.get(&id).map(|e| e.job.snapshot())
    }

    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        let st = self.inner.state.lock();
        let mut all: Vec<_> = st.jobs.values().map(|e| e.job.snapshot()).collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all
    }

    /// Current state plus a receiver for every later update of `id`.
    pub fn subscribe(&self, id: JobId) -> Option<JobStream> {
        let st = self.inner.state.lock();
        let entry = st.jobs.get(&id)?;
        Some(JobStream {
            snapshot: entry.job.snapshot_update(),
            status: entry.job.status,
            updates: entry.bus.subscribe(),
        })
    }

    /// Full current state of a live job, in update form.
    pub fn current_update(&self, id: JobId) -> Option<JobUpdate> {
        self.inner
            .state
            .lock()
            .jobs
            .get(&id)
            .map(|e| e.job.snapshot_update())
    }

    /// Mint a ticket. Stream tickets need a live job; file tickets also
    /// accept jobs that only remain in history.
    pub fn issue_ticket(&self, scope: TicketScope, id: JobId) -> Result<Ticket, EngineError> {
        let known = self.inner.state.lock().jobs.contains_key(&id)
            || (scope == TicketScope::File && self.inner.store.get(id).is_some());
        if !known {
            return Err(EngineError::NotFound);
        }
        Ok(self.inner.tickets.issue(scope, id))
    }

    pub fn verify_ticket(&self, value: &str, id: JobId, scope: TicketScope) -> bool {
        self.inner.tickets.verify(value, id, scope)
    }

    /// Real path of a completed job's file, guaranteed inside the download root.
    pub async fn completed_file(&self, id: JobId) -> Result<PathBuf, EngineError> {
        let live = self
            .inner
            .state
            .lock()
            .jobs
            .get(&id)
            .map(|e| (e.job.status, e.job.file_path.clone()));
        let (status, file_path) = match live {
            Some(found) => found,
            None => {
                let record = self.inner.store.get(id).ok_or(EngineError::NotFound)?;
                (record.status, record.file_path)
            }
        };
        let file_path = match (status, file_path) {
            (JobStatus::Completed, Some(p)) if !p.is_empty() => p,
            _ => return Err(EngineError::FileNotReady),
        };

        let candidate = PathBuf::from(strip_quotes(&file_path));
        let candidate = if candidate.is_absolute() {
            candidate
        } else {
            self.inner.paths.download_dir.join(candidate)
        };
        let real = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|_| EngineError::FileMissing)?;
        if !real.starts_with(&self.inner.paths.download_dir) {
            return Err(EngineError::InvalidFilePath);
        }
        Ok(real)
    }

    pub fn history(&self, filter: &HistoryFilter) -> Vec<JobRecord> {
        self.inner.store.list(filter)
    }

    /// History record plus its persisted log lines.
    pub fn history_item(&self, id: JobId) -> Option<(JobRecord, Vec<String>)> {
        let record = self.inner.store.get(id)?;
        let logs = self.inner.store.logs(id, HISTORY_LOG_LINES);
        Some((record, logs))
    }

    pub fn system(&self) -> SystemReport {
        let (active_jobs, queued_jobs) = {
            let st = self.inner.state.lock();
            (st.active.len(), st.queue.len())
        };
        SystemReport {
            active_jobs,
            queued_jobs,
            active_resource_units: self.inner.ledger.in_use(),
            budget: self.inner.monitor.current_budget(),
        }
    }

    /// Probe up to [`MAX_ANALYZE_URLS`] public URLs for preview metadata.
    pub async fn analyze(&self, urls: Vec<String>) -> Result<AnalyzeReport, EngineError> {
        if urls.is_empty() || urls.len() > MAX_ANALYZE_URLS {
            return Err(ValidationError::InvalidRequest("Invalid URL payload.".to_string()).into());
        }
        let urls: Vec<String> = urls.iter().map(|u| u.trim().to_string()).collect();
        for url in &urls {
            url::Url::parse(url).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;
        }
        let checks = futures::future::join_all(urls.iter().map(|u| self.inner.guard.validate(u))).await;
        for check in checks {
            check?;
        }
        Ok(self.inner.analyzer.analyze(&urls).await?)
    }

    /// Stop admitting work, fail running jobs, stop their processes and flush
    /// the history. Safe to call more than once.
    pub async fn shutdown(&self, reason: &str) -> Result<()> {
        let (runs, tasks) = {
            let mut st = self.inner.state.lock();
            if st.shutting_down {
                return Ok(());
            }
            st.shutting_down = true;
            st.queue.clear();
            st.active.clear();
            let mut runs: Vec<RunHandle> = Vec::new();
            let mut tasks = Vec::new();
            for entry in st.jobs.values_mut() {
                entry.cancel_cleanup();
                let Some(run) = entry.run.take() else {
                    continue;
                };
                entry.job.status = JobStatus::Error;
                entry.job.resource_units = 0;
                entry.job.finished_at = Some(Utc::now());
                entry.emit(
                    &self.inner.store,
                    JobUpdate {
                        resource_units: Some(0),
                        ..JobUpdate::status(
                            JobStatus::Error,
                            format!("[error] Server shutdown unexpectedly ({reason})."),
                        )
                    },
                );
                entry.persist(&self.inner.store, true);
                runs.push(run);
                tasks.extend(entry.task.take());
            }
            (runs, tasks)
        };

        tracing::info!(reason, running = runs.len(), "engine shutting down");
        for run in runs {
            run.stop_and_release();
        }
        let wait = self.inner.cfg.kill_grace() + Duration::from_secs(2);
        if tokio::time::timeout(wait, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            tracing::warn!("extractor processes did not exit in time");
        }
        let store = self.inner.store.clone();
        tokio::task::spawn_blocking(move || store.flush())
            .await
            .context("history flush task")?
    }
}
