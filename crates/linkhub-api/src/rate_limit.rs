//! Per-project rate limiting.
//!
//! Two limits apply to every authenticated request: a token bucket over a
//! rolling minute and a fixed window over the UTC calendar day. Defaults are
//! configurable per project through the settings map. Every response carries
//! `X-RateLimit-Limit`, `X-RateLimit-Remaining`, and `X-RateLimit-Reset`;
//! exceeded buckets yield 429 with a `Retry-After` hint.

use std::collections::HashMap;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Datelike, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use linkhub_core::BrokerError;
use linkhub_db::models::Project;

use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::state::AppState;

/// Rate-limit response headers.
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    /// The per-minute limit, surfaced in `X-RateLimit-Limit`.
    pub limit: u32,
    /// Requests left in the current minute.
    pub remaining: u32,
    /// Unix seconds when the minute allowance replenishes.
    pub reset_at: i64,
    /// Hint for `Retry-After` on rejection.
    pub retry_after_secs: u64,
}

/// Token bucket over a rolling minute.
#[derive(Debug)]
struct MinuteBucket {
    tokens: f64,
    capacity: u32,
    last_refill: Instant,
}

impl MinuteBucket {
    fn new(capacity: u32) -> Self {
        Self {
            tokens: f64::from(capacity),
            capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill_rate(&self) -> f64 {
        f64::from(self.capacity) / 60.0
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate()).min(f64::from(self.capacity));
        self.last_refill = now;
    }

    /// Try to take one token; returns (allowed, remaining, secs until a token).
    fn try_take(&mut self) -> (bool, u32, u64) {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            (true, self.tokens.floor() as u32, 0)
        } else {
            let wait = ((1.0 - self.tokens) / self.refill_rate()).ceil() as u64;
            (false, 0, wait.max(1))
        }
    }
}

/// Fixed window over the UTC calendar day.
#[derive(Debug)]
struct DayWindow {
    day_ordinal: i32,
    count: u32,
    limit: u32,
}

impl DayWindow {
    fn new(limit: u32) -> Self {
        Self {
            day_ordinal: Utc::now().num_days_from_ce(),
            count: 0,
            limit,
        }
    }

    /// Try to count one request; returns (allowed, secs until midnight).
    fn try_take(&mut self) -> (bool, u64) {
        let today = Utc::now().num_days_from_ce();
        if today != self.day_ordinal {
            self.day_ordinal = today;
            self.count = 0;
        }

        if self.count < self.limit {
            self.count += 1;
            (true, 0)
        } else {
            let now = Utc::now();
            let midnight = (now + chrono::Duration::days(1))
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .unwrap_or(now);
            let wait = (midnight - now).num_seconds().max(1) as u64;
            (false, wait)
        }
    }
}

struct ProjectBuckets {
    minute: MinuteBucket,
    day: DayWindow,
}

/// Registry of per-project buckets.
///
/// Buckets are created on a project's first request with its configured
/// limits; mutation happens under a write lock scoped to the check.
pub struct ProjectRateLimiter {
    buckets: RwLock<HashMap<Uuid, ProjectBuckets>>,
}

impl Default for ProjectRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectRateLimiter {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Whether buckets already exist for a project (skips the settings read).
    pub async fn buckets_exist(&self, project_id: Uuid) -> bool {
        self.buckets.read().await.contains_key(&project_id)
    }

    /// Check (and count) one request for a project.
    pub async fn check(
        &self,
        project_id: Uuid,
        minute_limit: u32,
        day_limit: u32,
    ) -> RateDecision {
        let mut buckets = self.buckets.write().await;
        let entry = buckets.entry(project_id).or_insert_with(|| ProjectBuckets {
            minute: MinuteBucket::new(minute_limit.max(1)),
            day: DayWindow::new(day_limit.max(1)),
        });

        let (minute_ok, remaining, minute_wait) = entry.minute.try_take();
        if !minute_ok {
            return RateDecision {
                allowed: false,
                limit: entry.minute.capacity,
                remaining: 0,
                reset_at: Utc::now().timestamp() + minute_wait as i64,
                retry_after_secs: minute_wait,
            };
        }

        let (day_ok, day_wait) = entry.day.try_take();
        if !day_ok {
            return RateDecision {
                allowed: false,
                limit: entry.minute.capacity,
                remaining,
                reset_at: Utc::now().timestamp() + day_wait as i64,
                retry_after_secs: day_wait,
            };
        }

        RateDecision {
            allowed: true,
            limit: entry.minute.capacity,
            remaining,
            reset_at: Utc::now().timestamp() + 60,
            retry_after_secs: 0,
        }
    }
}

/// Axum middleware applying the project rate limits.
///
/// Runs after the authenticator; the project id comes from [`AuthContext`].
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(auth) = request.extensions().get::<AuthContext>().cloned() else {
        // Unauthenticated routes are not rate limited here.
        return next.run(request).await;
    };

    // Per-project overrides live in the settings map; the lookup only runs
    // until the project's buckets exist.
    let (minute_limit, day_limit) = {
        let has_buckets = state
            .rate_limiter
            .buckets_exist(auth.project_id)
            .await;
        if has_buckets {
            (state.config.default_minute_limit, state.config.default_day_limit)
        } else {
            match Project::find_by_id(&state.pool, auth.project_id).await {
                Ok(Some(project)) => (
                    project
                        .rate_limit_per_minute()
                        .unwrap_or(state.config.default_minute_limit),
                    project
                        .rate_limit_per_day()
                        .unwrap_or(state.config.default_day_limit),
                ),
                _ => (
                    state.config.default_minute_limit,
                    state.config.default_day_limit,
                ),
            }
        }
    };

    let decision = state
        .rate_limiter
        .check(auth.project_id, minute_limit, day_limit)
        .await;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        tracing::warn!(
            target: "rate_limit",
            project_id = %auth.project_id,
            retry_after = decision.retry_after_secs,
            "Rate limit exceeded"
        );
        ApiError(BrokerError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        })
        .into_response()
    };

    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert(HEADER_LIMIT, v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert(HEADER_REMAINING, v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.reset_at.to_string()) {
        headers.insert(HEADER_RESET, v);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requests_within_limit_allowed() {
        let limiter = ProjectRateLimiter::new();
        let project = Uuid::new_v4();

        for i in 0..10 {
            let decision = limiter.check(project, 60, 1000).await;
            assert!(decision.allowed, "request {i} should pass");
            assert_eq!(decision.limit, 60);
        }
    }

    #[tokio::test]
    async fn test_minute_bucket_exhausts() {
        let limiter = ProjectRateLimiter::new();
        let project = Uuid::new_v4();

        for _ in 0..5 {
            assert!(limiter.check(project, 5, 1000).await.allowed);
        }

        let rejected = limiter.check(project, 5, 1000).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert!(rejected.retry_after_secs >= 1);
    }

    #[tokio::test]
    async fn test_day_window_exhausts() {
        let limiter = ProjectRateLimiter::new();
        let project = Uuid::new_v4();

        // Generous minute limit; tiny day limit.
        for _ in 0..3 {
            assert!(limiter.check(project, 1000, 3).await.allowed);
        }

        let rejected = limiter.check(project, 1000, 3).await;
        assert!(!rejected.allowed);
        // Retry points at the day rollover, which is further out than a minute.
        assert!(rejected.retry_after_secs > 60);
    }

    #[tokio::test]
    async fn test_projects_are_isolated() {
        let limiter = ProjectRateLimiter::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        for _ in 0..3 {
            assert!(limiter.check(a, 3, 100).await.allowed);
        }
        assert!(!limiter.check(a, 3, 100).await.allowed);

        // Project B still has a full bucket.
        assert!(limiter.check(b, 3, 100).await.allowed);
    }

    #[tokio::test]
    async fn test_remaining_counts_down() {
        let limiter = ProjectRateLimiter::new();
        let project = Uuid::new_v4();

        let first = limiter.check(project, 10, 100).await;
        let second = limiter.check(project, 10, 100).await;
        assert!(first.remaining > second.remaining);
    }
}
