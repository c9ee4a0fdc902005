use serde::Serialize;

use super::JobStatus;

/// Partial job state published on the notification bus.
///
/// Only the fields that changed are set; the SSE layer serializes it as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_history: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_units: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

impl JobUpdate {
    pub fn log(line: impl Into<String>) -> Self {
        Self {
            log: Some(line.into()),
            ..Self::default()
        }
    }

    pub fn status(status: JobStatus, line: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            log: Some(line.into()),
            ..Self::default()
        }
    }

    /// True once this update moves the job into a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(JobStatus::is_terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_only_set_fields() {
        let u = JobUpdate::status(JobStatus::Completed, "[done] Download completed.");
        let json = serde_json::to_value(&u).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": "completed", "log": "[done] Download completed."})
        );
        assert!(u.is_terminal());
        assert!(!JobUpdate::log("x").is_terminal());
    }
}
