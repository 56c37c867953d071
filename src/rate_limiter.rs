use dial_core::{Admission, AdmissionControl, ClientIdentity, EndpointClass};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Limit applied to one endpoint class
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassLimit {
    /// Maximum number of requests per window
    pub max_requests: u32,
    /// Window duration in seconds
    pub window_seconds: u64,
    /// Text returned to clients once the limit is hit
    pub message: String,
}

impl ClassLimit {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Configuration for rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether to enable rate limiting
    pub enabled: bool,
    /// Minimum spacing between sweeps of expired windows
    pub cleanup_interval_seconds: u64,
    pub sms: ClassLimit,
    pub call: ClassLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cleanup_interval_seconds: 300, // 5 minutes
            sms: ClassLimit {
                max_requests: 10,
                window_seconds: 15 * 60,
                message: "Too many SMS requests from this IP, please try again later.".to_string(),
            },
            call: ClassLimit {
                max_requests: 5,
                window_seconds: 15 * 60,
                message: "Too many call requests from this IP, please try again later.".to_string(),
            },
        }
    }
}

impl RateLimitConfig {
    pub fn limit_for(&self, class: EndpointClass) -> &ClassLimit {
        match class {
            EndpointClass::Sms => &self.sms,
            EndpointClass::Call => &self.call,
        }
    }

    /// Reject limits that could never admit a request.
    pub fn validate(&self) -> Result<(), String> {
        for class in [EndpointClass::Sms, EndpointClass::Call] {
            let limit = self.limit_for(class);
            if limit.max_requests == 0 {
                return Err(format!("rate_limit.{}.max_requests must be positive", class));
            }
            if limit.window_seconds == 0 {
                return Err(format!("rate_limit.{}.window_seconds must be positive", class));
            }
        }
        Ok(())
    }
}

/// Time source for the limiter.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to; clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-window rate limiter keyed by client identity and endpoint class.
///
/// A window opens on the first request and admits `max_requests` requests
/// until `window_seconds` have elapsed since it opened; the next request after
/// that opens a fresh window. Bursts straddling a window boundary can
/// therefore reach twice the limit.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<RateLimiterInner>,
}

#[derive(Debug)]
struct RateLimiterInner {
    windows: HashMap<(ClientIdentity, EndpointClass), RateWindow>,
    last_cleanup: Instant,
}

#[derive(Debug)]
struct RateWindow {
    count: u32,
    started: Instant,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            config,
            clock,
            inner: Mutex::new(RateLimiterInner {
                windows: HashMap::new(),
                last_cleanup: now,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RateLimiterInner> {
        // Counters stay consistent even if a holder panicked mid-update.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a request and decide whether it may proceed
    pub fn check_rate_limit(&self, identity: &ClientIdentity, class: EndpointClass) -> Admission {
        if !self.config.enabled {
            return Admission::Allowed;
        }

        let limit = self.config.limit_for(class);
        let window_len = limit.window();
        let now = self.clock.now();
        let mut inner = self.lock();

        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval_seconds);
        if now.duration_since(inner.last_cleanup) >= cleanup_interval {
            self.cleanup_expired(&mut inner, now);
            inner.last_cleanup = now;
        }

        let window = inner
            .windows
            .entry((identity.clone(), class))
            .or_insert(RateWindow {
                count: 0,
                started: now,
            });

        let elapsed = now.duration_since(window.started);
        if window.count == 0 || elapsed >= window_len {
            window.count = 1;
            window.started = now;
            debug!(%identity, %class, "Opened rate limit window");
            return Admission::Allowed;
        }

        window.count = window.count.saturating_add(1);
        if window.count > limit.max_requests {
            warn!(%identity, %class, count = window.count, "Rate limit exceeded");
            Admission::Denied {
                message: limit.message.clone(),
                retry_after: window_len - elapsed,
            }
        } else {
            debug!(
                %identity,
                %class,
                remaining = limit.max_requests - window.count,
                "Rate limit OK"
            );
            Admission::Allowed
        }
    }

    /// Get current rate limit status for a client
    pub fn status(&self, identity: &ClientIdentity, class: EndpointClass) -> Option<RateLimitStatus> {
        let limit = self.config.limit_for(class);
        let now = self.clock.now();
        let inner = self.lock();
        inner.windows.get(&(identity.clone(), class)).map(|window| {
            if now.duration_since(window.started) >= limit.window() {
                RateLimitStatus {
                    remaining: limit.max_requests,
                    limit: limit.max_requests,
                    reset_time: now + limit.window(),
                }
            } else {
                RateLimitStatus {
                    remaining: limit.max_requests.saturating_sub(window.count),
                    limit: limit.max_requests,
                    reset_time: window.started + limit.window(),
                }
            }
        })
    }

    /// Number of windows currently held in memory.
    pub fn tracked_windows(&self) -> usize {
        self.lock().windows.len()
    }

    fn cleanup_expired(&self, inner: &mut RateLimiterInner, now: Instant) {
        let before = inner.windows.len();
        inner.windows.retain(|(_, class), window| {
            now.duration_since(window.started) < self.config.limit_for(*class).window()
        });
        let removed = before - inner.windows.len();
        if removed > 0 {
            debug!(removed, "Cleaned up expired rate limit windows");
        }
    }
}

impl AdmissionControl for RateLimiter {
    fn admit(&self, identity: &ClientIdentity, class: EndpointClass) -> Admission {
        self.check_rate_limit(identity, class)
    }
}

/// Rate limit status information
#[derive(Debug, Clone)]
pub struct RateLimitStatus {
    /// Remaining requests
    pub remaining: u32,
    /// Total request limit
    pub limit: u32,
    /// When the rate limit resets
    pub reset_time: Instant,
}
