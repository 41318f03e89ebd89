//! Fixed-window message quota per actor
//!
//! The first call for an actor opens a window. Calls inside the window count
//! up to the ceiling; once it is reached every call is rejected until the
//! window elapses, after which the next call opens a fresh window with a
//! count of one. State lives only in memory, so a restart clears every quota.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::{CoreError, Result};

/// Tracked actors before a new one triggers a sweep of elapsed windows
const DEFAULT_PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct RateLimitState {
    count: u32,
    window_start: Instant,
}

/// Outcome of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
}

/// Registry of per-actor windows, constructed once and shared
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    prune_threshold: usize,
    states: Mutex<HashMap<String, RateLimitState>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_prune_threshold(mut self, threshold: usize) -> Self {
        self.prune_threshold = threshold;
        self
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_messages, config.window())
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Count a call for `actor` and report whether it may proceed
    pub fn check_rate_limit(&self, actor: &str) -> RateLimitDecision {
        self.check_at(actor, Instant::now())
    }

    /// Like [`check_rate_limit`](Self::check_rate_limit), with an explicit clock
    pub fn check_at(&self, actor: &str, now: Instant) -> RateLimitDecision {
        if self.max_requests == 0 {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
            };
        }

        let mut states = self.states.lock();
        if states.len() >= self.prune_threshold && !states.contains_key(actor) {
            let before = states.len();
            states.retain(|_, s| now.saturating_duration_since(s.window_start) < self.window);
            tracing::debug!(dropped = before - states.len(), "Pruned elapsed rate-limit windows");
        }

        let state = states.entry(actor.to_string()).or_insert(RateLimitState {
            count: 0,
            window_start: now,
        });

        if state.count == 0 || now.saturating_duration_since(state.window_start) >= self.window {
            state.count = 1;
            state.window_start = now;
            return RateLimitDecision {
                allowed: true,
                remaining: self.max_requests.saturating_sub(1),
            };
        }

        if state.count >= self.max_requests {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
            };
        }

        state.count += 1;
        RateLimitDecision {
            allowed: true,
            remaining: self.max_requests - state.count,
        }
    }

    /// Milliseconds until `actor`'s window resets; zero if no window is open
    pub fn time_until_reset(&self, actor: &str) -> u64 {
        self.time_until_reset_at(actor, Instant::now())
    }

    pub fn time_until_reset_at(&self, actor: &str, now: Instant) -> u64 {
        let states = self.states.lock();
        let Some(state) = states.get(actor) else {
            return 0;
        };
        let elapsed = now.saturating_duration_since(state.window_start);
        self.window.saturating_sub(elapsed).as_millis() as u64
    }

    /// Check and turn a rejection into [`CoreError::RateLimited`]
    pub fn enforce(&self, actor: &str) -> Result<RateLimitDecision> {
        let decision = self.check_rate_limit(actor);
        if decision.allowed {
            Ok(decision)
        } else {
            tracing::info!(actor, "Chat rate limit reached");
            Err(CoreError::RateLimited {
                actor: actor.to_string(),
                limit: self.max_requests,
                retry_after_ms: self.time_until_reset(actor),
            })
        }
    }

    /// Count inside the current window, for diagnostics
    pub fn current_count(&self, actor: &str) -> u32 {
        self.states.lock().get(actor).map_or(0, |s| s.count)
    }

    /// Actors with a tracked window
    pub fn tracked_actors(&self) -> usize {
        self.states.lock().len()
    }
}
