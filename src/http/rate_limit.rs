//! Sliding-window rate limiting
//!
//! Each endpoint class owns a window of recently admitted call timestamps.
//! A call is admitted only when fewer than `capacity` calls were admitted in
//! the trailing `window`; otherwise the caller sleeps until the oldest
//! admission ages out.

use crate::types::EndpointClass;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Capacity and window length for one endpoint class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindowConfig {
    /// Maximum admitted calls within the window
    pub capacity: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl RateWindowConfig {
    /// Create a window config
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window_ms: window.as_millis() as u64,
        }
    }

    /// Window length as a duration
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Default window for a class (HubSpot private-app limits)
    pub fn default_for(class: EndpointClass) -> Self {
        match class {
            EndpointClass::Default => Self::new(100, Duration::from_secs(10)),
            EndpointClass::Search => Self::new(4, Duration::from_secs(1)),
            EndpointClass::BulkList => Self::new(10, Duration::from_secs(1)),
        }
    }
}

/// Configuration for rate limiting, one window per endpoint class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Per-class windows; missing classes fall back to their defaults
    pub classes: HashMap<EndpointClass, RateWindowConfig>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            classes: EndpointClass::ALL
                .iter()
                .map(|c| (*c, RateWindowConfig::default_for(*c)))
                .collect(),
        }
    }
}

impl RateLimiterConfig {
    /// Same capacity and window for every class
    pub fn uniform(capacity: u32, window: Duration) -> Self {
        Self {
            classes: EndpointClass::ALL
                .iter()
                .map(|c| (*c, RateWindowConfig::new(capacity, window)))
                .collect(),
        }
    }

    /// Override one class
    #[must_use]
    pub fn with_class(mut self, class: EndpointClass, window: RateWindowConfig) -> Self {
        self.classes.insert(class, window);
        self
    }

    /// Window config for a class
    pub fn get(&self, class: EndpointClass) -> RateWindowConfig {
        self.classes
            .get(&class)
            .copied()
            .unwrap_or_else(|| RateWindowConfig::default_for(class))
    }
}

/// Admission state for one class
#[derive(Debug)]
struct RateWindow {
    capacity: usize,
    window: Duration,
    admitted: VecDeque<Instant>,
}

impl RateWindow {
    fn new(config: RateWindowConfig) -> Self {
        Self {
            capacity: config.capacity.max(1) as usize,
            window: config.window(),
            admitted: VecDeque::new(),
        }
    }

    /// Drop admissions that have aged out of the window
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.admitted.front() {
            if now.duration_since(*oldest) >= self.window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time to wait before a call can be admitted; `None` when admissible now
    fn wait_time(&mut self, now: Instant) -> Option<Duration> {
        self.prune(now);
        if self.admitted.len() < self.capacity {
            return None;
        }
        self.admitted
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
    }

    fn record(&mut self, now: Instant) {
        self.admitted.push_back(now);
    }
}

/// Sliding-window rate limiter keyed by endpoint class
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<HashMap<EndpointClass, Mutex<RateWindow>>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given config
    pub fn new(config: &RateLimiterConfig) -> Self {
        let windows = EndpointClass::ALL
            .iter()
            .map(|c| (*c, Mutex::new(RateWindow::new(config.get(*c)))))
            .collect();
        Self {
            windows: Arc::new(windows),
        }
    }

    fn window(&self, class: EndpointClass) -> &Mutex<RateWindow> {
        // Every class is populated in `new`
        &self.windows[&class]
    }

    /// Wait until a call of this class could be admitted, without recording it
    pub async fn admit(&self, class: EndpointClass) {
        loop {
            let wait = self.window(class).lock().await.wait_time(Instant::now());
            match wait {
                None => return,
                Some(delay) => {
                    debug!(class = %class, ?delay, "Rate window full, sleeping");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Timestamp an admitted call
    pub async fn record(&self, class: EndpointClass) {
        self.window(class).lock().await.record(Instant::now());
    }

    /// Admit and record in one lock acquisition
    pub async fn acquire(&self, class: EndpointClass) {
        loop {
            let wait = {
                let mut window = self.window(class).lock().await;
                let now = Instant::now();
                match window.wait_time(now) {
                    None => {
                        window.record(now);
                        return;
                    }
                    Some(delay) => delay,
                }
            };
            debug!(class = %class, ?wait, "Rate window full, sleeping");
            tokio::time::sleep(wait).await;
        }
    }

    /// Admit and record only if possible without waiting
    pub async fn try_acquire(&self, class: EndpointClass) -> bool {
        let mut window = self.window(class).lock().await;
        let now = Instant::now();
        if window.wait_time(now).is_none() {
            window.record(now);
            true
        } else {
            false
        }
    }

    /// Number of admissions currently inside the trailing window
    pub async fn in_window(&self, class: EndpointClass) -> usize {
        let mut window = self.window(class).lock().await;
        window.prune(Instant::now());
        window.admitted.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(&RateLimiterConfig::default())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod rate_limit_tests {
    use super::*;

    #[test]
    fn test_rate_limiter_config_default() {
        let config = RateLimiterConfig::default();
        assert_eq!(
            config.get(EndpointClass::Default),
            RateWindowConfig::new(100, Duration::from_secs(10))
        );
        assert_eq!(config.get(EndpointClass::Search).capacity, 4);
        assert_eq!(config.get(EndpointClass::BulkList).capacity, 10);
    }

    #[test]
    fn test_rate_limiter_config_override() {
        let config = RateLimiterConfig::default().with_class(
            EndpointClass::Search,
            RateWindowConfig::new(2, Duration::from_millis(500)),
        );
        assert_eq!(config.get(EndpointClass::Search).capacity, 2);
        assert_eq!(config.get(EndpointClass::Search).window_ms, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_capacity_does_not_block() {
        let limiter = RateLimiter::new(&RateLimiterConfig::default());
        let start = Instant::now();

        for _ in 0..4 {
            limiter.acquire(EndpointClass::Search).await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_window(EndpointClass::Search).await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_at_capacity_sleeps_until_oldest_expires() {
        let limiter = RateLimiter::new(&RateLimiterConfig::default());
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire(EndpointClass::Search).await;
        }

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        // Never blocks longer than one window
        assert!(elapsed <= Duration::from_secs(1) + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_never_exceeds_capacity() {
        let config = RateLimiterConfig::uniform(3, Duration::from_millis(200));
        let limiter = RateLimiter::new(&config);

        for _ in 0..20 {
            limiter.acquire(EndpointClass::Default).await;
            assert!(limiter.in_window(EndpointClass::Default).await <= 3);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_classes_are_independent() {
        let config = RateLimiterConfig::uniform(1, Duration::from_secs(5));
        let limiter = RateLimiter::new(&config);

        assert!(limiter.try_acquire(EndpointClass::Search).await);
        assert!(!limiter.try_acquire(EndpointClass::Search).await);
        assert!(limiter.try_acquire(EndpointClass::Default).await);
        assert!(limiter.try_acquire(EndpointClass::BulkList).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_then_record() {
        let config = RateLimiterConfig::uniform(1, Duration::from_secs(2));
        let limiter = RateLimiter::new(&config);

        limiter.admit(EndpointClass::Default).await;
        limiter.record(EndpointClass::Default).await;

        let start = Instant::now();
        limiter.admit(EndpointClass::Default).await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admissions_age_out() {
        let config = RateLimiterConfig::uniform(2, Duration::from_secs(1));
        let limiter = RateLimiter::new(&config);

        limiter.acquire(EndpointClass::Default).await;
        limiter.acquire(EndpointClass::Default).await;
        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(limiter.in_window(EndpointClass::Default).await, 0);
        assert!(limiter.try_acquire(EndpointClass::Default).await);
    }
}
