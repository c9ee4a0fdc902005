//! Engine-owned registry state. Only touched under the engine lock.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};

use crate::job::{Job, JobId, JobUpdate};
use crate::notify::JobBus;
use crate::scheduler::{JobQueue, Reservation};
use crate::store::{JobRecord, JobStore};

/// Minimum spacing of non-forced history writes for one job.
const PERSIST_INTERVAL: Duration = Duration::from_secs(2);

/// Held while a job's extractor process runs.
///
/// Whoever takes it out of the entry (exit handling, cancel, shutdown) is the
/// single party that releases the units, by dropping it.
pub(crate) struct RunHandle {
    pub run_id: u64,
    pub reservation: Reservation,
    pub stop: Option<oneshot::Sender<()>>,
}

impl RunHandle {
    /// Signal the supervisor to terminate the process, then release the units.
    pub fn stop_and_release(mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }
}

pub(crate) struct JobEntry {
    pub job: Job,
    pub bus: JobBus,
    pub run: Option<RunHandle>,
    pub task: Option<JoinHandle<()>>,
    pub cleanup: Option<AbortHandle>,
}

impl JobEntry {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            bus: JobBus::new(),
            run: None,
            task: None,
            cleanup: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Publish `update`; a log line also goes to the tail and the history log.
    pub fn emit(&mut self, store: &JobStore, update: JobUpdate) {
        if let Some(line) = &update.log {
            self.job.push_log(line.clone());
            store.append_log(self.job.id, line);
        }
        self.bus.publish(update);
    }

    /// Mirror the job into the history store; unforced writes are throttled.
    pub fn persist(&mut self, store: &JobStore, force: bool) {
        let now = Instant::now();
        if !force
            && self
                .job
                .last_persist
                .is_some_and(|t| now.duration_since(t) < PERSIST_INTERVAL)
        {
            return;
        }
        self.job.last_persist = Some(now);
        store.save(JobRecord::from(&self.job));
    }

    pub fn cancel_cleanup(&mut self) {
        if let Some(handle) = self.cleanup.take() {
            handle.abort();
        }
    }
}

#[derive(Default)]
pub(crate) struct EngineState {
    pub jobs: HashMap<JobId, JobEntry>,
    pub queue: JobQueue,
    /// Jobs holding a [`RunHandle`].
    pub active: HashSet<JobId>,
    pub queue_retry_pending: bool,
    pub shutting_down: bool,
    next_run_id: u64,
}

impl EngineState {
    pub fn next_run_id(&mut self) -> u64 {
        self.next_run_id += 1;
        self.next_run_id
    }
}
