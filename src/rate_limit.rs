use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::models::Id;

/// Sliding window in-memory rate limiter (pod local).
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
        if !self.enabled {
            return true;
        }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Per-action limits derived from env. Keys are authenticated user ids, not
/// client addresses.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub topic_limit: usize,
    pub topic_window: Duration,
    pub post_limit: usize,
    pub post_window: Duration,
    pub review_limit: usize,
    pub review_window: Duration,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize {
            std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        }
        fn dur_env(name: &str, default: u64) -> Duration {
            Duration::from_secs(std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default))
        }
        Self {
            topic_limit: usize_env("RL_TOPIC_LIMIT", 3),
            topic_window: dur_env("RL_TOPIC_WINDOW", 300),
            post_limit: usize_env("RL_POST_LIMIT", 10),
            post_window: dur_env("RL_POST_WINDOW", 60),
            review_limit: usize_env("RL_REVIEW_LIMIT", 5),
            review_window: dur_env("RL_REVIEW_WINDOW", 3600),
        }
    }
}

/// High level guard used by handlers.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self {
        Self { limiter, cfg }
    }

    /// Disabled limiter for tests and tooling.
    pub fn disabled() -> Self {
        Self::new(InMemoryRateLimiter::new(false), RateLimitConfig::from_env())
    }

    pub fn allow_topic(&self, user_id: Id) -> bool {
        self.limiter.check(&format!("topic:{user_id}"), self.cfg.topic_limit, self.cfg.topic_window)
    }

    pub fn allow_post(&self, user_id: Id) -> bool {
        self.limiter.check(&format!("post:{user_id}"), self.cfg.post_limit, self.cfg.post_window)
    }

    pub fn allow_review(&self, user_id: Id) -> bool {
        self.limiter.check(&format!("review:{user_id}"), self.cfg.review_limit, self.cfg.review_window)
    }
}
