//! Attempt throttling for credential and OTP endpoints
//!
//! Keys are caller-chosen (`"login:<contact>"`, `"otp:<contact>"`). A key that
//! exhausts its attempts inside the window is locked out for the ban period.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::warn;

use crate::config::IdentitySettings;

#[derive(Debug, Clone)]
pub struct AttemptPolicy {
    pub max_attempts: u32,
    pub window: Duration,
    pub ban: Duration,
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(300),
            ban: Duration::from_secs(3600),
        }
    }
}

impl From<&IdentitySettings> for AttemptPolicy {
    fn from(settings: &IdentitySettings) -> Self {
        Self {
            max_attempts: settings.rate_limit_max_attempts,
            window: Duration::from_secs(settings.rate_limit_window_secs),
            ban: Duration::from_secs(settings.rate_limit_ban_secs),
        }
    }
}

#[derive(Debug)]
struct AttemptWindow {
    attempts: u32,
    window_start: Instant,
    banned_until: Option<Instant>,
}

impl AttemptWindow {
    /// Nothing left to remember: the window has elapsed and no ban is live.
    fn is_stale(&self, now: Instant, policy: &AttemptPolicy) -> bool {
        let ban_over = self.banned_until.is_none_or(|until| now >= until);
        ban_over && now.duration_since(self.window_start) >= policy.window
    }
}

#[derive(Debug)]
struct Windows {
    by_key: HashMap<String, AttemptWindow>,
    last_pruned: Instant,
}

/// Sliding attempt counter shared across request handlers
#[derive(Debug, Clone)]
pub struct RateLimiter {
    policy: AttemptPolicy,
    windows: Arc<Mutex<Windows>>,
}

impl RateLimiter {
    pub fn new(policy: AttemptPolicy) -> Self {
        Self {
            policy,
            windows: Arc::new(Mutex::new(Windows {
                by_key: HashMap::new(),
                last_pruned: Instant::now(),
            })),
        }
    }

    /// Count an attempt for `key`; false once the key is locked out
    pub async fn try_acquire(&self, key: &str) -> bool {
        self.try_acquire_at(key, Instant::now()).await
    }

    async fn try_acquire_at(&self, key: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock().await;
        // Keys are caller-controlled; sweep stale ones at most once per window.
        if now.saturating_duration_since(windows.last_pruned) >= self.policy.window {
            let policy = &self.policy;
            windows.by_key.retain(|_, w| !w.is_stale(now, policy));
            windows.last_pruned = now;
        }

        let window = windows.by_key.entry(key.to_string()).or_insert(AttemptWindow {
            attempts: 0,
            window_start: now,
            banned_until: None,
        });

        match window.banned_until {
            Some(until) if now < until => return false,
            Some(_) => {
                window.banned_until = None;
                window.attempts = 0;
                window.window_start = now;
            }
            None => {}
        }

        if now.duration_since(window.window_start) >= self.policy.window {
            window.attempts = 0;
            window.window_start = now;
        }

        if window.attempts >= self.policy.max_attempts {
            window.banned_until = Some(now + self.policy.ban);
            warn!(key, ban_secs = self.policy.ban.as_secs(), "Attempt limit reached");
            return false;
        }

        window.attempts += 1;
        true
    }

    /// Forget a key after a successful attempt
    pub async fn reset(&self, key: &str) {
        self.windows.lock().await.by_key.remove(key);
    }

    pub fn policy(&self) -> &AttemptPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_attempts: u32) -> RateLimiter {
        RateLimiter::new(AttemptPolicy {
            max_attempts,
            window: Duration::from_secs(60),
            ban: Duration::from_secs(120),
        })
    }

    #[tokio::test]
    async fn locks_out_after_max_attempts() {
        let limiter = limiter(3);
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.try_acquire_at("login:a@example.com", now).await);
        }
        assert!(!limiter.try_acquire_at("login:a@example.com", now).await);
        // other keys are unaffected
        assert!(limiter.try_acquire_at("login:b@example.com", now).await);
    }

    #[tokio::test]
    async fn ban_lifts_after_ban_period() {
        let limiter = limiter(1);
        let now = Instant::now();

        assert!(limiter.try_acquire_at("k", now).await);
        assert!(!limiter.try_acquire_at("k", now).await);
        assert!(!limiter.try_acquire_at("k", now + Duration::from_secs(60)).await);
        assert!(limiter.try_acquire_at("k", now + Duration::from_secs(121)).await);
    }

    #[tokio::test]
    async fn window_expiry_resets_count() {
        let limiter = limiter(2);
        let now = Instant::now();

        assert!(limiter.try_acquire_at("k", now).await);
        assert!(limiter.try_acquire_at("k", now).await);
        assert!(limiter.try_acquire_at("k", now + Duration::from_secs(61)).await);
    }

    #[tokio::test]
    async fn reset_clears_attempts() {
        let limiter = limiter(1);

        assert!(limiter.try_acquire("k").await);
        limiter.reset("k").await;
        assert!(limiter.try_acquire("k").await);
    }

    #[tokio::test]
    async fn stale_keys_are_dropped() {
        let limiter = limiter(1);
        let now = Instant::now();

        assert!(limiter.try_acquire_at("login:old@example.com", now).await);
        assert!(limiter.try_acquire_at("login:banned@example.com", now).await);
        assert!(!limiter.try_acquire_at("login:banned@example.com", now).await);
        assert_eq!(limiter.windows.lock().await.by_key.len(), 2);

        // window elapsed for both, but the ban on the second is still live
        let later = now + Duration::from_secs(61);
        assert!(limiter.try_acquire_at("login:new@example.com", later).await);

        let windows = limiter.windows.lock().await;
        assert!(!windows.by_key.contains_key("login:old@example.com"));
        assert!(windows.by_key.contains_key("login:banned@example.com"));
        assert!(windows.by_key.contains_key("login:new@example.com"));
    }
}
