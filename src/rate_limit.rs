use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Sliding window in-memory rate limiter (process local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window { entry.pop_front(); } else { break; }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Per-action limits for the unauthenticated entry points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub submit_limit: usize,
    pub submit_window: Duration,
    pub track_limit: usize,
    pub track_window: Duration,
    pub login_limit: usize,
    pub login_window: Duration,
}

/// High level guard used by handlers, keyed by client IP.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }
    pub fn allow_submission(&self, ip: &str) -> bool { self.limiter.check(&format!("submit:{ip}"), self.cfg.submit_limit, self.cfg.submit_window) }
    pub fn allow_tracking(&self, ip: &str) -> bool { self.limiter.check(&format!("track:{ip}"), self.cfg.track_limit, self.cfg.track_window) }
    pub fn allow_login(&self, ip: &str) -> bool { self.limiter.check(&format!("login:{ip}"), self.cfg.login_limit, self.cfg.login_window) }
}
