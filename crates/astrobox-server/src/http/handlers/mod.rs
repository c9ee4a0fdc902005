//! HTTP API request handlers, grouped by resource.

mod analyze;
mod history;
mod jobs;
mod system;
mod tickets;

use astrobox_core::engine::Engine;
use astrobox_core::job::JobId;

use super::types::ApiError;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

/// Parse a job id path segment; malformed ids cannot name a job.
fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::not_found("Job not found."))
}

pub use analyze::analyze;
pub use history::{get_history, list_history};
pub use jobs::{cancel_download, download_file, download_progress, get_download, start_download, submit_download};
pub use system::{formats, health, not_found, system};
pub use tickets::issue_ticket;
