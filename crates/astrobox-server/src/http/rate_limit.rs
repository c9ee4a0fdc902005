//! Per-client request limit.
//!
//! Each client address gets a fixed window of [`WINDOW`]; requests beyond the
//! limit inside the window are answered with 429 and `Retry-After`. Responses
//! carry the `RateLimit-Policy` and `RateLimit` headers.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use super::types::ErrorResponse;

pub const WINDOW: Duration = Duration::from_secs(60);

/// Expired windows are swept once this many clients are tracked.
const SWEEP_THRESHOLD: usize = 4096;

const POLICY_HEADER: HeaderName = HeaderName::from_static("ratelimit-policy");
const STATE_HEADER: HeaderName = HeaderName::from_static("ratelimit");

struct Window {
    started: Instant,
    count: u32,
}

/// Outcome of one request against the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the client's window restarts.
    pub reset: Duration,
}

impl Decision {
    fn reset_secs(&self) -> u64 {
        let secs = self.reset.as_secs() + u64::from(self.reset.subsec_nanos() > 0);
        secs.max(1)
    }

    fn apply_headers(&self, window: Duration, headers: &mut HeaderMap) {
        let policy = format!("{};w={}", self.limit, window.as_secs());
        let state = format!(
            "limit={}, remaining={}, reset={}",
            self.limit,
            self.remaining,
            self.reset_secs()
        );
        if let Ok(v) = HeaderValue::from_str(&policy) {
            headers.insert(POLICY_HEADER, v);
        }
        if let Ok(v) = HeaderValue::from_str(&state) {
            headers.insert(STATE_HEADER, v);
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    clients: Arc<Mutex<HashMap<IpAddr, Window>>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count one request from `ip` at `now`.
    pub fn check(&self, ip: IpAddr, now: Instant) -> Decision {
        let mut clients = self.clients.lock();
        if clients.len() >= SWEEP_THRESHOLD {
            clients.retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        }
        let window = clients.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }
        let reset = self
            .window
            .saturating_sub(now.saturating_duration_since(window.started));
        if window.count >= self.limit {
            return Decision {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                reset,
            };
        }
        window.count += 1;
        Decision {
            allowed: true,
            limit: self.limit,
            remaining: self.limit - window.count,
            reset,
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }
}

/// Client address from the connection; requests served without connect info
/// share one bucket.
fn client_ip(request: &Request<Body>) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    let decision = limiter.check(ip, Instant::now());
    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        warn!(client = %ip, "rate limit exceeded");
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse::new("Too many requests, please try again later.")),
        )
            .into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(decision.reset_secs()));
        response
    };
    decision.apply_headers(limiter.window, response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, last))
    }

    #[test]
    fn window_allows_limit_then_blocks() {
        let limiter = RateLimiter::new(3, WINDOW);
        let start = Instant::now();
        let remaining: Vec<u32> = (0..3)
            .map(|_| limiter.check(ip(1), start).remaining)
            .collect();
        assert_eq!(remaining, [2, 1, 0]);

        let blocked = limiter.check(ip(1), start + Duration::from_secs(10));
        assert!(!blocked.allowed);
        assert_eq!(blocked.reset, Duration::from_secs(50));
        assert_eq!(blocked.reset_secs(), 50);

        // other clients have their own window
        assert!(limiter.check(ip(2), start).allowed);
    }

    #[test]
    fn window_restarts_after_expiry() {
        let limiter = RateLimiter::new(1, WINDOW);
        let start = Instant::now();
        assert!(limiter.check(ip(1), start).allowed);
        assert!(!limiter.check(ip(1), start + Duration::from_secs(59)).allowed);
        let again = limiter.check(ip(1), start + WINDOW);
        assert!(again.allowed);
        assert_eq!(again.reset, WINDOW);
    }

    #[test]
    fn expired_clients_are_swept() {
        let limiter = RateLimiter::new(5, WINDOW);
        let start = Instant::now();
        for n in 0..SWEEP_THRESHOLD {
            let addr = IpAddr::V6(std::net::Ipv6Addr::from(n as u128 + 1));
            limiter.check(addr, start);
        }
        assert_eq!(limiter.tracked_clients(), SWEEP_THRESHOLD);
        limiter.check(ip(9), start + WINDOW);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn headers_follow_draft_format() {
        let decision = Decision {
            allowed: true,
            limit: 120,
            remaining: 119,
            reset: Duration::from_millis(59_500),
        };
        let mut headers = HeaderMap::new();
        decision.apply_headers(WINDOW, &mut headers);
        assert_eq!(headers.get("ratelimit-policy").unwrap(), "120;w=60");
        assert_eq!(
            headers.get("ratelimit").unwrap(),
            "limit=120, remaining=119, reset=60"
        );
    }
}
