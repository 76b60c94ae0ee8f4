//! Sliding-window admission control keyed by `(key, action)`.
//!
//! Every key keeps a log of the instants it was admitted at, pruned to the
//! trailing window. A request is admitted only while the log holds fewer than
//! `max_requests` entries, so no window of `window_ms` ever contains more
//! admissions than the limit. Entries live in a sharded `DashMap` and each check
//! runs under that key's entry guard.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl RateLimitRule {
    pub fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms,
            max_requests,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self::new(60_000, 10)
    }
}

/// Default rule plus per-action overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub default: RateLimitRule,
    pub actions: HashMap<String, RateLimitRule>,
}

impl RateLimitSettings {
    pub fn with_action(mut self, action: impl Into<String>, rule: RateLimitRule) -> Self {
        self.actions.insert(action.into(), rule);
        self
    }

    pub fn rule_for(&self, action: &str) -> RateLimitRule {
        self.actions.get(action).copied().unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug)]
struct WindowLog {
    hits: VecDeque<Instant>,
    window: Duration,
}

impl WindowLog {
    fn new(window: Duration) -> Self {
        Self {
            hits: VecDeque::new(),
            window,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.hits.front() {
            if now.duration_since(*oldest) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.hits
            .back()
            .is_none_or(|last| now.duration_since(*last) >= self.window)
    }
}

/// Caller key and action, kept apart so no pair can alias another.
type WindowKey = (String, String);

pub struct RateLimiter {
    entries: Arc<DashMap<WindowKey, WindowLog>>,
    settings: RateLimitSettings,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            settings,
            cleanup: Mutex::new(None),
        }
    }

    /// A limiter applying a single rule to every action.
    pub fn with_rule(window_ms: u64, max_requests: u32) -> Self {
        Self::new(RateLimitSettings {
            default: RateLimitRule::new(window_ms, max_requests),
            actions: HashMap::new(),
        })
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Records a request for `key` performing `action` and reports whether it is admitted.
    pub fn check_limit(&self, key: &str, action: &str) -> RateLimitDecision {
        let rule = self.settings.rule_for(action);
        let now = Instant::now();
        let (allowed, remaining, reset_in) = {
            let mut log = self
                .entries
                .entry((key.to_owned(), action.to_owned()))
                .or_insert_with(|| WindowLog::new(rule.window()));
            log.window = rule.window();
            log.prune(now);

            let allowed = log.hits.len() < rule.max_requests as usize;
            if allowed {
                log.hits.push_back(now);
            }
            let remaining = rule.max_requests.saturating_sub(log.hits.len() as u32);
            let reset_in = log
                .hits
                .front()
                .map(|oldest| (*oldest + log.window).saturating_duration_since(now))
                .unwrap_or_default();
            (allowed, remaining, reset_in)
        };

        let reset_at = Utc::now()
            + chrono::Duration::from_std(reset_in).unwrap_or_else(|_| chrono::Duration::zero());
        if allowed {
            debug!(key, action, remaining, "rate limit check passed");
        } else {
            warn!(key, action, %reset_at, "rate limit exceeded");
        }
        RateLimitDecision {
            allowed,
            remaining,
            reset_at,
        }
    }

    /// Forgets the history of one key, unblocking it immediately.
    pub fn reset(&self, key: &str, action: &str) {
        self.entries.remove(&(key.to_owned(), action.to_owned()));
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }

    /// Drops keys whose last admission is older than their window.
    pub fn evict_idle(&self) -> usize {
        evict_idle(&self.entries)
    }

    /// Starts a background task that evicts idle keys every `interval`.
    ///
    /// Must be called from within a Tokio runtime. Calling it again replaces the
    /// previous task.
    pub fn spawn_cleanup(&self, interval: Duration) {
        let entries = Arc::clone(&self.entries);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = evict_idle(&entries);
                if evicted > 0 {
                    debug!(evicted, "evicted idle rate limit keys");
                }
            }
        });
        let mut slot = self.cleanup.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stops the cleanup task and releases all state. The limiter must not be used afterwards.
    pub fn destroy(&self) {
        let mut slot = self.cleanup.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        self.entries.clear();
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        let slot = self.cleanup.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

fn evict_idle(entries: &DashMap<WindowKey, WindowLog>) -> usize {
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|_, log| !log.is_idle(now));
    before.saturating_sub(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequential_checks_within_window() {
        let limiter = RateLimiter::with_rule(60_000, 10);
        let decisions: Vec<_> = (0..15)
            .map(|_| limiter.check_limit("user-1", "payment"))
            .collect();

        assert_eq!(decisions.iter().filter(|d| d.allowed).count(), 10);
        assert_eq!(decisions.iter().filter(|d| !d.allowed).count(), 5);
        assert_eq!(decisions[0].remaining, 9);
        assert_eq!(decisions[9].remaining, 0);
        assert!(decisions[14].reset_at > Utc::now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = RateLimiter::with_rule(1_000, 2);
        assert!(limiter.check_limit("k", "a").allowed);
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.check_limit("k", "a").allowed);
        assert!(!limiter.check_limit("k", "a").allowed);

        // First admission leaves the window, second is still inside it.
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.check_limit("k", "a").allowed);
        assert!(!limiter.check_limit("k", "a").allowed);
    }

    #[tokio::test]
    async fn test_actions_and_keys_are_independent() {
        let settings = RateLimitSettings::default().with_action("payment", RateLimitRule::new(60_000, 1));
        let limiter = RateLimiter::new(settings);

        assert!(limiter.check_limit("user-1", "payment").allowed);
        assert!(!limiter.check_limit("user-1", "payment").allowed);
        assert!(limiter.check_limit("user-1", "history").allowed);
        assert!(limiter.check_limit("user-2", "payment").allowed);
        assert_eq!(limiter.tracked_keys(), 3);
    }

    #[tokio::test]
    async fn test_separator_in_key_does_not_alias() {
        let limiter = RateLimiter::with_rule(60_000, 1);
        assert!(limiter.check_limit("a:b", "c").allowed);
        assert!(limiter.check_limit("a", "b:c").allowed);
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[tokio::test]
    async fn test_reset_unblocks_key() {
        let limiter = RateLimiter::with_rule(60_000, 1);
        assert!(limiter.check_limit("k", "a").allowed);
        assert!(!limiter.check_limit("k", "a").allowed);
        limiter.reset("k", "a");
        assert!(limiter.check_limit("k", "a").allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_evicts_idle_keys() {
        let limiter = RateLimiter::with_rule(1_000, 5);
        limiter.spawn_cleanup(Duration::from_millis(500));
        limiter.check_limit("k", "a");
        assert_eq!(limiter.tracked_keys(), 1);

        tokio::time::sleep(Duration::from_millis(1_600)).await;
        assert_eq!(limiter.tracked_keys(), 0);
        limiter.destroy();
    }

    #[tokio::test]
    async fn test_destroy_releases_state() {
        let limiter = RateLimiter::with_rule(60_000, 5);
        limiter.spawn_cleanup(Duration::from_secs(1));
        limiter.check_limit("k", "a");
        limiter.destroy();
        assert_eq!(limiter.tracked_keys(), 0);
        assert!(limiter.cleanup.lock().unwrap().is_none());
    }
}
