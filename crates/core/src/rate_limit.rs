//! Fixed-window request rate limiting.
//!
//! [`RateLimiter`] is the check/increment contract; [`InMemoryRateLimiter`]
//! keeps windows in process memory, which is correct for a single instance.
//! A multi-instance deployment implements the same trait over a shared
//! TTL-backed counter store.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Whether `key` may make another request, without counting it.
    async fn check(&self, key: &str) -> RateLimitDecision;

    /// Count one request against `key`.
    async fn increment(&self, key: &str);

    /// Decide and, when allowed, count the request.
    ///
    /// The default composes `check` and `increment` and is therefore not
    /// atomic; stores that can do both in one step override it.
    async fn acquire(&self, key: &str) -> RateLimitDecision {
        let decision = self.check(key).await;
        if decision.is_allowed() {
            self.increment(key).await;
        }
        decision
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

impl Window {
    fn fresh(now: Instant) -> Self {
        Self {
            started: now,
            count: 0,
        }
    }
}

/// Per-key fixed windows of `window` length allowing `limit` requests each.
pub struct InMemoryRateLimiter {
    limit: u32,
    window: Duration,
    /// Key -> current window
    windows: DashMap<String, Window>,
}

impl InMemoryRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
        }
    }

    /// `limit` requests per minute.
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    fn decide(&self, w: &Window, now: Instant) -> RateLimitDecision {
        let elapsed = now.duration_since(w.started);
        if elapsed >= self.window {
            return RateLimitDecision::Allowed {
                remaining: self.limit,
            };
        }
        if w.count >= self.limit {
            RateLimitDecision::Limited {
                retry_after: self.window - elapsed,
            }
        } else {
            RateLimitDecision::Allowed {
                remaining: self.limit - w.count,
            }
        }
    }

    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        match self.windows.get(key) {
            Some(w) => self.decide(w.value(), now),
            None => RateLimitDecision::Allowed {
                remaining: self.limit,
            },
        }
    }

    pub fn increment_at(&self, key: &str, now: Instant) {
        {
            let mut entry = self
                .windows
                .entry(key.to_string())
                .or_insert_with(|| Window::fresh(now));
            let w = entry.value_mut();
            if now.duration_since(w.started) >= self.window {
                *w = Window::fresh(now);
            }
            w.count = w.count.saturating_add(1);
        }
        self.prune(now);
    }

    /// Check and count under one entry guard, so concurrent callers for the
    /// same key cannot both take the last slot.
    pub fn acquire_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let decision = {
            let mut entry = self
                .windows
                .entry(key.to_string())
                .or_insert_with(|| Window::fresh(now));
            let w = entry.value_mut();
            if now.duration_since(w.started) >= self.window {
                *w = Window::fresh(now);
            }
            let decision = self.decide(w, now);
            if decision.is_allowed() {
                w.count = w.count.saturating_add(1);
            }
            decision
        };
        self.prune(now);
        decision
    }

    /// Drop expired windows so the map does not grow without bound. Must not
    /// run while an entry guard is held.
    fn prune(&self, now: Instant) {
        let window = self.window;
        self.windows
            .retain(|_, w| now.duration_since(w.started) < window);
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    async fn increment(&self, key: &str) {
        self.increment_at(key, Instant::now())
    }

    async fn acquire(&self, key: &str) -> RateLimitDecision {
        self.acquire_at(key, Instant::now())
    }
}
