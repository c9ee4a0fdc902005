use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{DownloadOptions, JobId, JobStatus, JobUpdate};
use crate::scheduler::RuntimeBudget;

/// Body of a download submission.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub url: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub options: Option<DownloadOptions>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub id: JobId,
    pub status: JobStatus,
    /// Estimated cost of the job.
    pub resource_units: u32,
    pub resource_budget_units: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemReport {
    pub active_jobs: usize,
    pub queued_jobs: usize,
    pub active_resource_units: u32,
    pub budget: RuntimeBudget,
}

/// A subscription: the state at subscribe time plus every later delta.
pub struct JobStream {
    pub snapshot: JobUpdate,
    pub status: JobStatus,
    pub updates: broadcast::Receiver<JobUpdate>,
}
