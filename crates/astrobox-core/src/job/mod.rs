//! Job model: lifecycle status, live job state, snapshots and deltas.
//!
//! `Job` is the engine-owned mutable record. Everything that leaves the
//! engine (API responses, persisted records, bus messages) is a copy.

mod options;
mod update;

pub use options::{
    validate_format, AudioFormat, Container, DownloadOptions, OutputFormat, Quality,
    ResolutionCap, ValidationError,
};
pub use update::JobUpdate;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use uuid::Uuid;

/// Job identifier (UUID v4).
pub type JobId = Uuid;

/// Placeholder for speed / eta / size before the extractor reports them.
pub const PLACEHOLDER: &str = "—";

/// Lines kept in the in-memory log tail.
pub const LOG_TAIL: usize = 120;

/// Samples kept in the speed history window.
pub const SPEED_HISTORY: usize = 20;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Paused,
    Queued,
    #[serde(alias = "processing")]
    Downloading,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Paused => "paused",
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// `completed`, `error` and `cancelled` never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paused" => Ok(JobStatus::Paused),
            "queued" => Ok(JobStatus::Queued),
            "downloading" | "processing" => Ok(JobStatus::Downloading),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(ValidationError::InvalidStatus(s.to_string())),
        }
    }
}

/// Live job state held by the engine.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub title: String,
    pub status: JobStatus,
    pub progress: f64,
    pub speed: String,
    pub eta: String,
    pub size: String,
    pub format: String,
    pub logs: VecDeque<String>,
    pub speed_history: VecDeque<f64>,
    pub file_path: Option<String>,
    pub resource_units: u32,
    /// Failed runs so far.
    pub attempts: u32,
    pub options: DownloadOptions,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub(crate) last_persist: Option<Instant>,
}

impl Job {
    /// New job in `paused` (autoStart false) or `queued` state.
    pub fn new(url: String, format: String, options: DownloadOptions) -> Self {
        let status = if options.auto_start == Some(false) {
            JobStatus::Paused
        } else {
            JobStatus::Queued
        };
        let first_line = match status {
            JobStatus::Paused => "[pause] Job created. Start manually.",
            _ => "[queue] Job queued.",
        };
        let mut logs = VecDeque::with_capacity(LOG_TAIL);
        logs.push_back(first_line.to_string());
        Self {
            id: Uuid::new_v4(),
            title: url.clone(),
            url,
            status,
            progress: 0.0,
            speed: PLACEHOLDER.to_string(),
            eta: PLACEHOLDER.to_string(),
            size: PLACEHOLDER.to_string(),
            format,
            logs,
            speed_history: VecDeque::with_capacity(SPEED_HISTORY),
            file_path: None,
            resource_units: 0,
            attempts: 0,
            options,
            started_at: Utc::now(),
            finished_at: None,
            last_persist: None,
        }
    }

    /// Append to the bounded log tail, dropping the oldest line.
    pub fn push_log(&mut self, line: impl Into<String>) {
        if self.logs.len() >= LOG_TAIL {
            self.logs.pop_front();
        }
        self.logs.push_back(line.into());
    }

    pub fn push_speed_sample(&mut self, value: f64) {
        if self.speed_history.len() >= SPEED_HISTORY {
            self.speed_history.pop_front();
        }
        self.speed_history.push_back(value);
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            url: self.url.clone(),
            title: self.title.clone(),
            status: self.status,
            progress: self.progress,
            speed: self.speed.clone(),
            eta: self.eta.clone(),
            size: self.size.clone(),
            format: self.format.clone(),
            speed_history: self.speed_history.iter().copied().collect(),
            file_path: self.file_path.clone(),
            resource_units: self.resource_units,
            attempts: self.attempts,
            started_at: self.started_at,
            finished_at: self.finished_at,
            logs: self.logs.iter().cloned().collect(),
        }
    }

    /// Full-state delta sent as the first SSE event.
    pub fn snapshot_update(&self) -> JobUpdate {
        JobUpdate {
            status: Some(self.status),
            progress: Some(self.progress),
            speed: Some(self.speed.clone()),
            eta: Some(self.eta.clone()),
            size: Some(self.size.clone()),
            format: Some(self.format.clone()),
            speed_history: Some(self.speed_history.iter().copied().collect()),
            file_path: self.file_path.clone(),
            resource_units: Some(self.resource_units),
            ..JobUpdate::default()
        }
    }
}

/// Read-only copy of a job returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub url: String,
    pub title: String,
    pub status: JobStatus,
    pub progress: f64,
    pub speed: String,
    pub eta: String,
    pub size: String,
    pub format: String,
    pub speed_history: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub resource_units: u32,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub logs: Vec<String>,
}
