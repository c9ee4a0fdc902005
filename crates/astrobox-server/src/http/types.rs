//! JSON request and response bodies of the HTTP API.

use astrobox_core::engine::EngineError;
use astrobox_core::job::JobStatus;
use astrobox_core::store::JobRecord;
use astrobox_core::tickets::TicketScope;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error body: `{"error": "..."}`, plus the job status where it explains the error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            status: None,
        }
    }

    pub fn unauthorized() -> Self {
        Self::new("Unauthorized.")
    }

    pub fn not_found() -> Self {
        Self::new("Not found.")
    }
}

/// Status code plus error body; what every fallible handler returns.
#[derive(Debug)]
pub struct ApiError {
    pub code: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            body: ErrorResponse::new(message),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let code = match &err {
            EngineError::NotFound | EngineError::FileNotReady | EngineError::FileMissing => {
                StatusCode::NOT_FOUND
            }
            EngineError::CannotStart(_)
            | EngineError::Validation(_)
            | EngineError::Origin(_)
            | EngineError::InvalidFilePath => StatusCode::BAD_REQUEST,
            EngineError::NotCancellable(_) => StatusCode::CONFLICT,
            EngineError::Analyze(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        };
        let status = match &err {
            EngineError::CannotStart(s) | EngineError::NotCancellable(s) => Some(*s),
            _ => None,
        };
        Self {
            code,
            body: ErrorResponse {
                error: err.to_string(),
                status,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code, Json(self.body)).into_response()
    }
}

/// `{"ok": true}` with the resulting status when relevant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            status: None,
        }
    }

    pub fn with_status(status: JobStatus) -> Self {
        Self {
            ok: true,
            status: Some(status),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub time: DateTime<Utc>,
    pub active_jobs: usize,
    pub queued_jobs: usize,
    pub active_resource_units: u32,
    pub resource_budget_units: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRequest {
    pub scope: TicketScope,
    pub job_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub q: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryListResponse {
    pub items: Vec<JobRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryItemResponse {
    pub item: JobRecord,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FormatPreset {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub format: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct FormatsResponse {
    pub presets: &'static [FormatPreset],
}

pub const FORMAT_PRESETS: &[FormatPreset] = &[
    FormatPreset {
        id: "archival",
        title: "Archival",
        description: "Maximum fidelity, lossless audio",
        format: "bestvideo*+bestaudio/best",
    },
    FormatPreset {
        id: "mobile",
        title: "Mobile",
        description: "1080p cap, size optimized",
        format: "bestvideo[height<=1080]+bestaudio",
    },
    FormatPreset {
        id: "audio",
        title: "Audio Only",
        description: "Extract best audio stream",
        format: "bestaudio/best",
    },
    FormatPreset {
        id: "balanced",
        title: "Balanced",
        description: "1440p cap, smart quality",
        format: "bestvideo[height<=1440]+bestaudio",
    },
];
