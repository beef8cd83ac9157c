//! Fixed-window request limiting keyed by client address.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::{error::ApiError, extract::client_ip, AppState};
use crate::config::RateLimitConfig;

const LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Expired windows are swept once this many clients are tracked.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32, reset: Duration },
    Limited { reset: Duration },
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: config.window(),
            windows: Arc::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_requests > 0
    }

    pub fn check(&self, client: &str) -> Decision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> Decision {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        if windows.len() >= SWEEP_THRESHOLD {
            let length = self.window;
            windows.retain(|_, w| now.saturating_duration_since(w.started) < length);
        }

        let window = windows.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(window.started) >= self.window {
            *window = Window {
                started: now,
                count: 0,
            };
        }

        let reset = self
            .window
            .saturating_sub(now.saturating_duration_since(window.started));
        if window.count >= self.max_requests {
            return Decision::Limited { reset };
        }
        window.count += 1;
        Decision::Allowed {
            remaining: self.max_requests - window.count,
            reset,
        }
    }

    fn stamp(&self, headers: &mut HeaderMap, remaining: u32, reset: Duration) {
        headers.insert(LIMIT, HeaderValue::from(self.max_requests));
        headers.insert(REMAINING, HeaderValue::from(remaining));
        headers.insert(RESET, HeaderValue::from(whole_seconds(reset)));
    }
}

fn whole_seconds(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

/// Rejects callers over their budget with 429 and reports the budget on
/// every response.
pub async fn limit_requests(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let limiter = &state.rate_limiter;
    if !limiter.is_enabled() {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let client = client_ip(&parts).unwrap_or_else(|| "unknown".to_string());
    let request = Request::from_parts(parts, body);

    match limiter.check(&client) {
        Decision::Allowed { remaining, reset } => {
            let mut response = next.run(request).await;
            limiter.stamp(response.headers_mut(), remaining, reset);
            response
        }
        Decision::Limited { reset } => {
            debug!(%client, "rate limit exceeded");
            let seconds = whole_seconds(reset);
            let mut response = ApiError::new(
                StatusCode::TOO_MANY_REQUESTS,
                format!("Rate limit exceeded, retry in {seconds} seconds"),
            )
            .into_response();
            limiter.stamp(response.headers_mut(), 0, reset);
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
            response
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            max_requests,
            window_secs: 60,
        })
    }

    #[test]
    fn budget_is_per_client() {
        let limiter = limiter(2);
        let now = Instant::now();

        assert!(matches!(
            limiter.check_at("10.0.0.1", now),
            Decision::Allowed { remaining: 1, .. }
        ));
        assert!(matches!(
            limiter.check_at("10.0.0.1", now),
            Decision::Allowed { remaining: 0, .. }
        ));
        assert_eq!(
            limiter.check_at("10.0.0.1", now),
            Decision::Limited {
                reset: Duration::from_secs(60)
            }
        );
        assert!(matches!(
            limiter.check_at("10.0.0.2", now),
            Decision::Allowed { remaining: 1, .. }
        ));
    }

    #[test]
    fn window_expiry_restores_the_budget() {
        let limiter = limiter(1);
        let start = Instant::now();

        assert!(matches!(limiter.check_at("a", start), Decision::Allowed { .. }));
        assert_eq!(
            limiter.check_at("a", start + Duration::from_secs(45)),
            Decision::Limited {
                reset: Duration::from_secs(15)
            }
        );
        assert!(matches!(
            limiter.check_at("a", start + Duration::from_secs(60)),
            Decision::Allowed { remaining: 0, .. }
        ));
    }

    #[test]
    fn zero_disables() {
        assert!(!limiter(0).is_enabled());
        assert!(limiter(1).is_enabled());
    }

    #[test]
    fn reset_rounds_up() {
        assert_eq!(whole_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(whole_seconds(Duration::from_secs(3)), 3);
    }
}
