//! Persistent job history (JSON file with debounced atomic writes).
//!
//! Keeps the newest `max_records` job records and up to `max_log_lines` log
//! lines per retained job. Mutations are cheap in-memory updates; the file is
//! rewritten at most once per debounce window, or immediately on [`JobStore::flush`].

mod file;
mod types;


pub use types::{FlushState, HistoryFilter, JobRecord, StoreData, DEFAULT_PAGE, MAX_PAGE};

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::job::{JobId, JobStatus};

const INTERRUPTED_LINE: &str = "[error] Interrupted by service restart.";

struct StoreState {
    data: StoreData,
    flush: FlushState,
}

struct StoreInner {
    path: PathBuf,
    max_records: usize,
    max_log_lines: usize,
    debounce: Duration,
    state: Mutex<StoreState>,
    /// Serializes snapshot-and-write so an older snapshot never lands last.
    write_lock: Mutex<()>,
}

/// Read the history file without taking ownership of it (no recovery, no writes).
pub fn read_snapshot(path: &Path) -> Result<StoreData> {
    file::read_data(path)
}

/// Cloneable handle to the history store.
#[derive(Clone)]
pub struct JobStore {
    inner: Arc<StoreInner>,
}

impl JobStore {
    /// Open (or create) the store at `path`.
    ///
    /// Records left in a non-terminal status by a previous process are marked
    /// `error` with an "interrupted" log line.
    pub fn open(path: impl Into<PathBuf>, cfg: &StoreConfig) -> Result<Self> {
        let path = path.into();
        let data = file::read_data(&path)?;
        let store = Self {
            inner: Arc::new(StoreInner {
                path,
                max_records: cfg.max_records.max(1),
                max_log_lines: cfg.max_log_lines.max(1),
                debounce: Duration::from_millis(cfg.flush_debounce_ms),
                state: Mutex::new(StoreState {
                    data,
                    flush: FlushState::Clean,
                }),
                write_lock: Mutex::new(()),
            }),
        };
        let recovered = store.recover_interrupted();
        if recovered > 0 {
            tracing::info!(count = recovered, "marked interrupted jobs as error");
            store.flush()?;
        }
        Ok(store)
    }

    fn recover_interrupted(&self) -> usize {
        let mut st = self.inner.state.lock();
        let now = Utc::now();
        let mut ids = Vec::new();
        for record in st.data.jobs.iter_mut() {
            if !record.status.is_terminal() {
                record.status = JobStatus::Error;
                record.finished_at.get_or_insert(now);
                ids.push(record.id);
            }
        }
        for id in &ids {
            st.data.logs.entry(*id).or_default().push(INTERRUPTED_LINE.to_string());
        }
        ids.len()
    }

    /// Insert or replace a record; new records go first. Evicts the oldest
    /// records beyond the cap together with their logs.
    pub fn save(&self, record: JobRecord) {
        let mut st = self.inner.state.lock();
        let data = &mut st.data;
        match data.jobs.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => data.jobs.insert(0, record),
        }
        if data.jobs.len() > self.inner.max_records {
            for evicted in data.jobs.drain(self.inner.max_records..) {
                data.logs.remove(&evicted.id);
            }
        }
        self.mark_dirty(&mut st);
    }

    /// Append one log line for a retained job; lines for unknown ids are dropped.
    pub fn append_log(&self, id: JobId, line: &str) {
        let mut st = self.inner.state.lock();
        if !st.data.jobs.iter().any(|r| r.id == id) {
            return;
        }
        let lines = st.data.logs.entry(id).or_default();
        lines.push(line.to_string());
        if lines.len() > self.inner.max_log_lines {
            let excess = lines.len() - self.inner.max_log_lines;
            lines.drain(..excess);
        }
        self.mark_dirty(&mut st);
    }

    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        let st = self.inner.state.lock();
        st.data.jobs.iter().find(|r| r.id == id).cloned()
    }

    /// Last `limit` log lines of a job (oldest first).
    pub fn logs(&self, id: JobId, limit: usize) -> Vec<String> {
        let st = self.inner.state.lock();
        match st.data.logs.get(&id) {
            Some(lines) => lines[lines.len().saturating_sub(limit)..].to_vec(),
            None => Vec::new(),
        }
    }

    /// Records matching `filter`, newest `started_at` first.
    pub fn list(&self, filter: &HistoryFilter) -> Vec<JobRecord> {
        self.inner.state.lock().data.list(filter)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.state.lock().data.jobs.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush_state(&self) -> FlushState {
        self.inner.state.lock().flush
    }

    /// Write the current data now, regardless of any pending debounce.
    pub fn flush(&self) -> Result<()> {
        self.inner.write(true)
    }

    fn mark_dirty(&self, st: &mut StoreState) {
        if st.flush == FlushState::Scheduled {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            st.flush = FlushState::Dirty;
            return;
        };
        st.flush = FlushState::Scheduled;
        let inner = Arc::clone(&self.inner);
        handle.spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            let writer = Arc::clone(&inner);
            match tokio::task::spawn_blocking(move || writer.write(false)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "debounced history write failed"),
                Err(e) => tracing::warn!(error = %e, "history writer task failed"),
            }
        });
    }
}

impl StoreInner {
    /// Snapshot and write. Without `force`, a clean store is left alone.
    fn write(&self, force: bool) -> Result<()> {
        let _guard = self.write_lock.lock();
        let json = {
            let mut st = self.state.lock();
            if !force && st.flush == FlushState::Clean {
                return Ok(());
            }
            st.flush = FlushState::Clean;
            serde_json::to_string_pretty(&st.data)?
        };
        if let Err(e) = file::write_atomic(&self.path, &json) {
            let mut st = self.state.lock();
            if st.flush == FlushState::Clean {
                st.flush = FlushState::Dirty;
            }
            return Err(e);
        }
        tracing::debug!(path = %self.path.display(), bytes = json.len(), "history written");
        Ok(())
    }
}
