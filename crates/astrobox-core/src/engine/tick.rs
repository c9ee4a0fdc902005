//! Admission: move queued jobs into running extractor processes while the
//! concurrency limit and the unit budget allow.

use std::sync::Arc;
use tokio::sync::oneshot;

use super::state::{EngineState, RunHandle};
use super::Inner;
use crate::job::{JobId, JobStatus, JobUpdate};
use crate::scheduler::Reservation;
use crate::supervisor::{build_args, LaunchContext};
use crate::url_model::resolve_target_dir;

impl Inner {
    /// Append a queued job to the queue (once) and try to admit work.
    pub(crate) fn enqueue(self: &Arc<Self>, id: JobId) {
        {
            let mut st = self.state.lock();
            if st.shutting_down || st.active.contains(&id) {
                return;
            }
            let Some(entry) = st.jobs.get_mut(&id) else {
                return;
            };
            entry.cancel_cleanup();
            if entry.job.status != JobStatus::Queued {
                return;
            }
            st.queue.push_back(id);
        }
        self.tick();
    }

    /// Admit queued jobs in FIFO order until the concurrency limit is reached
    /// or the head does not fit the current budget. A head that does not fit
    /// stays first and a single retry timer is armed.
    pub(crate) fn tick(self: &Arc<Self>) {
        let mut st = self.state.lock();
        if st.shutting_down {
            return;
        }
        let max_concurrent = self.cfg.scheduler.max_concurrent;
        while st.active.len() < max_concurrent {
            let Some(id) = st.queue.pop_front() else {
                break;
            };
            let Some(entry) = st.jobs.get(&id) else {
                continue;
            };
            if entry.job.status != JobStatus::Queued || entry.is_running() {
                continue;
            }

            let cost = self.monitor.job_cost(&entry.job.options);
            let budget = self.monitor.current_budget();
            match self.ledger.try_reserve(cost, budget.dynamic_unit_budget) {
                Some(reservation) => self.launch(&mut st, id, reservation),
                None => {
                    tracing::debug!(
                        job_id = %id,
                        cost,
                        in_use = self.ledger.in_use(),
                        budget = budget.dynamic_unit_budget,
                        "head of queue waits for resources"
                    );
                    st.queue.push_front(id);
                    self.schedule_queue_retry(&mut st);
                    break;
                }
            }
        }
    }

    fn schedule_queue_retry(self: &Arc<Self>, st: &mut EngineState) {
        if st.queue_retry_pending {
            return;
        }
        st.queue_retry_pending = true;
        let weak = Arc::downgrade(self);
        let delay = self.cfg.queue_retry();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.state.lock().queue_retry_pending = false;
            inner.tick();
        });
    }

    /// Start the extractor for `id` holding `reservation`.
    fn launch(self: &Arc<Self>, st: &mut EngineState, id: JobId, reservation: Reservation) {
        let threads = self.monitor.ffmpeg_threads(st.active.len());
        let run_id = st.next_run_id();
        let Some(entry) = st.jobs.get_mut(&id) else {
            return;
        };

        let target_dir =
            resolve_target_dir(&self.paths.download_dir, entry.job.options.download_folder.as_deref());
        let cookie_file = self.paths.cookie_file.is_file().then_some(self.paths.cookie_file.as_path());
        let ctx = LaunchContext {
            target_dir: &target_dir,
            cookie_file,
            ffmpeg_threads: threads,
            silent: self.cfg.extractor.silent,
            output_template: &self.cfg.extractor.output_template,
            default_chapter_template: &self.cfg.extractor.chapter_template,
        };
        let args = build_args(&entry.job.url, &entry.job.format, &entry.job.options, &ctx);

        let child = match self.extractor.spawn(&args) {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(job_id = %id, program = %self.extractor.program, "failed to spawn extractor: {e}");
                drop(reservation);
                self.fail_attempt(st, id, format!("[error] Failed to start extractor: {e}"));
                return;
            }
        };

        let units = reservation.units();
        let (stop_tx, stop_rx) = oneshot::channel();
        entry.run = Some(RunHandle {
            run_id,
            reservation,
            stop: Some(stop_tx),
        });
        entry.job.status = JobStatus::Downloading;
        entry.job.progress = 0.0;
        entry.job.resource_units = units;
        entry.emit(
            &self.store,
            JobUpdate {
                progress: Some(0.0),
                resource_units: Some(units),
                ..JobUpdate::status(
                    JobStatus::Downloading,
                    format!("[resource] Reserved {units} units."),
                )
            },
        );
        entry.persist(&self.store, true);
        tracing::info!(job_id = %id, pid = ?child.id(), units, threads, "extractor started");

        let task = tokio::spawn(Arc::clone(self).supervise(id, run_id, child, stop_rx));
        entry.task = Some(self.watch_run(id, run_id, task));
        st.active.insert(id);
    }
}
