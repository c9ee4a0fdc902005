//! Download job handlers: submit, inspect, start, cancel, progress stream, file.

use astrobox_core::engine::SubmitRequest;
use astrobox_core::job::JobUpdate;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{header, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{future, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, info, warn};

use super::super::types::{ApiError, OkResponse};
use super::{parse_job_id, AppState};

const KEEP_ALIVE: Duration = Duration::from_secs(15);

pub async fn submit_download(
    State(state): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(|e| {
        debug!("rejected download request body: {e}");
        ApiError::bad_request("Invalid download request.")
    })?;
    let receipt = state.engine.submit(request).await?;
    Ok(Json(receipt))
}

pub async fn get_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_job_id(&id)?;
    let snapshot = state
        .engine
        .snapshot(id)
        .ok_or_else(|| ApiError::not_found("Job not found."))?;
    Ok(Json(snapshot))
}

pub async fn start_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_job_id(&id)?;
    let status = state.engine.start(id)?;
    Ok(Json(OkResponse::with_status(status)))
}

pub async fn cancel_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_job_id(&id)?;
    state.engine.cancel(id)?;
    Ok(Json(OkResponse::ok()))
}

fn json_event(name: &'static str, update: &JobUpdate) -> Event {
    Event::default()
        .event(name)
        .json_data(update)
        .unwrap_or_else(|e| {
            warn!("SSE serialization error: {e}");
            Event::default().comment("unserializable update")
        })
}

/// Next SSE event for a subscriber.
#[derive(Debug)]
enum Step {
    Update(JobUpdate),
    /// Deltas were dropped; the client should replace its state.
    Resync(JobUpdate),
    /// Deltas were dropped and the job is no longer live.
    Lagged(u64),
}

/// Turn one broadcast item into the next event. After a lag the job is
/// re-read through `current`, and the stream ends once it is terminal.
fn advance(
    finished: &mut bool,
    item: Result<JobUpdate, BroadcastStreamRecvError>,
    current: impl FnOnce() -> Option<JobUpdate>,
) -> Option<Step> {
    if *finished {
        return None;
    }
    match item {
        Ok(update) => {
            *finished = update.is_terminal();
            Some(Step::Update(update))
        }
        Err(BroadcastStreamRecvError::Lagged(n)) => match current() {
            Some(snapshot) => {
                *finished = snapshot.is_terminal();
                Some(Step::Resync(snapshot))
            }
            None => {
                *finished = true;
                Some(Step::Lagged(n))
            }
        },
    }
}

/// SSE stream: one `snapshot` event, then an `update` per delta until the job
/// reaches a terminal status. A lagging client gets a fresh `snapshot`.
pub async fn download_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_job_id(&id)?;
    let sub = state
        .engine
        .subscribe(id)
        .ok_or_else(|| ApiError::not_found("Job not found."))?;
    info!(job_id = %id, "SSE client connected");

    let snapshot = json_event("snapshot", &sub.snapshot);
    let finished = sub.status.is_terminal();
    let engine = state.engine.clone();
    let updates = BroadcastStream::new(sub.updates).scan(finished, move |finished, item| {
        if let Err(BroadcastStreamRecvError::Lagged(n)) = &item {
            warn!(job_id = %id, missed = n, "SSE client lagged");
        }
        let next = advance(finished, item, || engine.current_update(id)).map(|step| match step {
            Step::Update(update) => json_event("update", &update),
            Step::Resync(snapshot) => json_event("snapshot", &snapshot),
            Step::Lagged(n) => Event::default().event("lagged").data(format!(r#"{{"missed":{n}}}"#)),
        });
        future::ready(next)
    });
    let stream = futures::stream::once(future::ready(snapshot))
        .chain(updates)
        .map(Ok::<_, Infallible>);

    Ok(Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(KEEP_ALIVE)
                .event(Event::default().event("ping")),
        )
        .into_response())
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(name: &str) -> HeaderValue {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();
    let mut encoded = String::with_capacity(name.len() * 3);
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || b"-._~".contains(&b) {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Stream a completed job's file as an attachment.
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let id = parse_job_id(&id)?;
    let path = state.engine.completed_file(id).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    info!(job_id = %id, file = %path.display(), "serving file");

    let response = match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    let mut response = response.map(Body::new);
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, content_disposition(&name));
    Ok(response)
}
