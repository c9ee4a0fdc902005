//! API token and access-ticket authentication.
//!
//! The token travels in the `x-api-token` header. Progress streams and file
//! downloads may instead carry a `ticket` query parameter bound to the job in
//! the path.

use astrobox_core::engine::Engine;
use astrobox_core::job::JobId;
use astrobox_core::tickets::TicketScope;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::types::ErrorResponse;

pub const TOKEN_HEADER: &str = "x-api-token";

#[derive(Clone)]
pub struct AuthState {
    /// SHA-256 of the expected token; `None` leaves the API open.
    token_digest: Option<Arc<[u8; 32]>>,
    engine: Engine,
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

impl AuthState {
    pub fn new(token: Option<&str>, engine: Engine) -> Self {
        Self {
            token_digest: token.map(|t| Arc::new(digest(t))),
            engine,
        }
    }

    pub fn auth_required(&self) -> bool {
        self.token_digest.is_some()
    }

    /// Constant-time comparison of digests.
    pub fn validate_token(&self, provided: &str) -> bool {
        let Some(expected) = &self.token_digest else {
            return true;
        };
        if provided.is_empty() {
            return false;
        }
        let got = digest(provided);
        got.iter()
            .zip(expected.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[derive(Debug, Default, Deserialize)]
struct TicketQuery {
    ticket: Option<String>,
}

/// Job id and ticket scope a request path accepts tickets for.
pub fn ticket_target(path: &str) -> Option<(JobId, TicketScope)> {
    let rest = path.strip_prefix("/api/download/")?;
    let (id, tail) = rest.split_once('/')?;
    let scope = match tail.trim_end_matches('/') {
        "progress" => TicketScope::Stream,
        "file" => TicketScope::File,
        _ => return None,
    };
    Some((id.parse().ok()?, scope))
}

pub async fn auth_middleware(
    State(auth): State<AuthState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !auth.auth_required() {
        return next.run(request).await;
    }

    let header_token = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .unwrap_or("");
    if auth.validate_token(header_token) {
        return next.run(request).await;
    }

    let ticket = Query::<TicketQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(q)| q.ticket)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    if let (Some(ticket), Some((job_id, scope))) = (ticket, ticket_target(request.uri().path())) {
        if auth.engine.verify_ticket(&ticket, job_id, scope) {
            return next.run(request).await;
        }
    }

    tracing::debug!(path = %request.uri().path(), "rejected unauthenticated request");
    (StatusCode::UNAUTHORIZED, Json(ErrorResponse::unauthorized())).into_response()
}
