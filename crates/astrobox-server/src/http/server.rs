//! HTTP API server
//!
//! Axum-based server for the AstroBox REST API.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use astrobox_core::engine::Engine;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::auth::{AuthState, TOKEN_HEADER};
use super::rate_limit::{self, rate_limit_middleware, RateLimiter};
use super::security::with_security_headers;
use super::handlers::AppState;
use super::routes::create_router;

/// HTTP API server
pub struct HttpServer {
    engine: Engine,
    token: Option<String>,
    cors_origins: Vec<String>,
    rate_limit_per_minute: u32,
    listen: String,
}

impl HttpServer {
    pub fn new(engine: Engine, token: Option<String>) -> Self {
        let server = &engine.config().server;
        let cors_origins = server.cors_origins.clone();
        let listen = server.listen.clone();
        let rate_limit_per_minute = server.rate_limit_per_minute;
        Self {
            engine,
            token,
            cors_origins,
            rate_limit_per_minute,
            listen,
        }
    }

    fn cors_layer(&self) -> Option<CorsLayer> {
        let origins: Vec<HeaderValue> = self
            .cors_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o.trim()) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        if origins.is_empty() {
            return None;
        }
        Some(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(TOKEN_HEADER)]),
        )
    }

    /// Full application: routes, auth, rate limit, security headers, CORS
    /// and request tracing.
    pub fn router(&self) -> Router {
        let app_state = AppState {
            engine: self.engine.clone(),
        };
        let auth_state = AuthState::new(self.token.as_deref(), self.engine.clone());
        let mut app = create_router(app_state, auth_state);
        if self.rate_limit_per_minute > 0 {
            let limiter = RateLimiter::new(self.rate_limit_per_minute, rate_limit::WINDOW);
            app = app.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
        }
        app = with_security_headers(app);
        if let Some(cors) = self.cors_layer() {
            app = app.layer(cors);
        }
        app.layer(TraceLayer::new_for_http())
    }

    /// Run the HTTP server until `shutdown` fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let addr: SocketAddr = self
            .listen
            .parse()
            .with_context(|| format!("Invalid HTTP listen address: {}", self.listen))?;
        let app = self.router();

        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind HTTP server on {addr}"))?;

        info!("AstroBox API listening on http://{}", addr);

        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                info!("HTTP server shutting down");
            })
            .await
            .context("HTTP server error")?;

        Ok(())
    }
}
