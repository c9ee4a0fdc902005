//! Types persisted in the history file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::job::{Job, JobId, JobStatus};

/// Durable subset of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub url: String,
    pub title: String,
    pub status: JobStatus,
    pub progress: f64,
    pub speed: String,
    pub eta: String,
    pub size: String,
    pub format: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default)]
    pub speed_history: Vec<f64>,
}

impl From<&Job> for JobRecord {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            url: job.url.clone(),
            title: job.title.clone(),
            status: job.status,
            progress: job.progress,
            speed: job.speed.clone(),
            eta: job.eta.clone(),
            size: job.size.clone(),
            format: job.format.clone(),
            started_at: job.started_at,
            finished_at: job.finished_at,
            file_path: job.file_path.clone(),
            speed_history: job.speed_history.iter().copied().collect(),
        }
    }
}

/// On-disk layout: records newest first, log lines per job id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreData {
    pub jobs: Vec<JobRecord>,
    pub logs: HashMap<JobId, Vec<String>>,
}

impl StoreData {
    /// Records matching `filter`, newest `started_at` first.
    pub fn list(&self, filter: &HistoryFilter) -> Vec<JobRecord> {
        let needle = filter
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase);
        let mut items: Vec<&JobRecord> = self
            .jobs
            .iter()
            .filter(|r| filter.matches(r, needle.as_deref()))
            .collect();
        items.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        items
            .into_iter()
            .skip(filter.offset)
            .take(filter.page_size())
            .cloned()
            .collect()
    }
}

/// Largest page `list` returns.
pub const MAX_PAGE: usize = 200;
pub const DEFAULT_PAGE: usize = 100;

/// History query: exact status, case-insensitive substring of title or url, pagination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFilter {
    pub status: Option<JobStatus>,
    pub query: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            status: None,
            query: None,
            limit: DEFAULT_PAGE,
            offset: 0,
        }
    }
}

impl HistoryFilter {
    pub(crate) fn matches(&self, record: &JobRecord, needle: Option<&str>) -> bool {
        if self.status.is_some_and(|s| s != record.status) {
            return false;
        }
        match needle {
            Some(n) => {
                record.title.to_lowercase().contains(n) || record.url.to_lowercase().contains(n)
            }
            None => true,
        }
    }

    pub(crate) fn page_size(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE)
    }
}

/// Write-back state of the in-memory data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// File matches memory.
    Clean,
    /// Changed, no write scheduled (no runtime, or a write failed).
    Dirty,
    /// Changed, a debounced write is pending.
    Scheduled,
}
