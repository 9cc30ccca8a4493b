use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

/// Closed windows are swept once per this many checks.
const SWEEP_EVERY: u64 = 1024;

/// Fixed-window counter per API token and matched route.
#[derive(Debug, Clone)]
pub struct ApiRateLimiter {
    window: Duration,
    max_requests: u32,
    windows: Arc<DashMap<(Uuid, String), Window>>,
    checks: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    used: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    /// Whole seconds until the current window closes, never zero.
    Limited { retry_after: u64 },
}

impl ApiRateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            windows: Arc::new(DashMap::new()),
            checks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Drop windows that have closed by `now`. Returns how many were removed.
    fn prune_idle(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now.saturating_duration_since(window.started) < self.window);
        before.saturating_sub(self.windows.len())
    }

    pub fn check(&self, token_id: Uuid, route: &str) -> Decision {
        self.check_at(token_id, route, Instant::now())
    }

    fn check_at(&self, token_id: Uuid, route: &str, now: Instant) -> Decision {
        // Must run before the entry guard below is taken.
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            let pruned = self.prune_idle(now);
            if pruned > 0 {
                tracing::debug!(
                    target = "willow::http::api::rate_limit",
                    pruned,
                    "Pruned idle rate limit windows"
                );
            }
        }

        let mut entry = self
            .windows
            .entry((token_id, route.to_string()))
            .or_insert(Window {
                started: now,
                used: 0,
            });

        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= self.window {
            *entry = Window {
                started: now,
                used: 0,
            };
        }

        if entry.used >= self.max_requests {
            let left = self
                .window
                .saturating_sub(now.saturating_duration_since(entry.started));
            let retry_after = left.as_secs() + u64::from(left.subsec_nanos() > 0);
            return Decision::Limited {
                retry_after: retry_after.max(1),
            };
        }

        entry.used += 1;
        Decision::Allowed {
            remaining: self.max_requests - entry.used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_each_token_and_route_separately() {
        let limiter = ApiRateLimiter::new(Duration::from_secs(60), 2);
        let token = Uuid::new_v4();
        let now = Instant::now();

        assert_eq!(
            limiter.check_at(token, "/api/posts", now),
            Decision::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.check_at(token, "/api/posts", now),
            Decision::Allowed { remaining: 0 }
        );
        assert_eq!(
            limiter.check_at(token, "/api/posts", now + Duration::from_millis(500)),
            Decision::Limited { retry_after: 60 }
        );
        assert_eq!(
            limiter.check_at(token, "/api/posts/{slug}", now),
            Decision::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.check_at(Uuid::new_v4(), "/api/posts", now),
            Decision::Allowed { remaining: 1 }
        );
    }

    #[test]
    fn a_new_window_resets_the_count() {
        let limiter = ApiRateLimiter::new(Duration::from_secs(10), 1);
        let token = Uuid::new_v4();
        let start = Instant::now();

        assert!(matches!(
            limiter.check_at(token, "/api/posts", start),
            Decision::Allowed { .. }
        ));
        assert_eq!(
            limiter.check_at(token, "/api/posts", start + Duration::from_secs(4)),
            Decision::Limited { retry_after: 6 }
        );
        assert!(matches!(
            limiter.check_at(token, "/api/posts", start + Duration::from_secs(10)),
            Decision::Allowed { .. }
        ));
    }

    #[test]
    fn prune_drops_only_closed_windows() {
        let limiter = ApiRateLimiter::new(Duration::from_secs(10), 5);
        let start = Instant::now();
        let idle = Uuid::new_v4();
        let busy = Uuid::new_v4();

        limiter.check_at(idle, "/api/posts", start);
        limiter.check_at(busy, "/api/posts", start + Duration::from_secs(8));
        assert_eq!(limiter.prune_idle(start + Duration::from_secs(12)), 1);
        assert_eq!(limiter.windows.len(), 1);
        assert!(limiter.windows.contains_key(&(busy, "/api/posts".to_string())));
    }

    #[test]
    fn idle_windows_are_swept_as_checks_accumulate() {
        let limiter = ApiRateLimiter::new(Duration::from_secs(1), 1);
        let start = Instant::now();
        for _ in 0..SWEEP_EVERY {
            limiter.check_at(Uuid::new_v4(), "/api/posts", start);
        }
        assert_eq!(limiter.windows.len(), SWEEP_EVERY as usize);

        let later = start + Duration::from_secs(2);
        let token = Uuid::new_v4();
        for _ in 0..SWEEP_EVERY {
            limiter.check_at(token, "/api/posts", later);
        }
        assert_eq!(limiter.windows.len(), 1);
    }
}
