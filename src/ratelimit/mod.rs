//! Fixed-window request rate limiting.
//!
//! Each identifier has one active window at a time. A check against a stale
//! window replaces it rather than incrementing in place, so bursts at window
//! boundaries can momentarily reach twice the nominal rate. That is an
//! accepted property of the fixed-window algorithm; swap the backing
//! structure for a sliding window behind the same [`RateLimiter::check`]
//! contract if stronger guarantees are ever needed.
//!
//! The limiter never errors. Rejection is `allowed: false` in the returned
//! decision, translated by callers into a 429 with a `Retry-After` hint.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use tracing::debug;

/// Bucket shared by all traffic that arrives without a forwarded-for chain.
/// Deliberately conservative: unidentified clients rate-limit each other.
pub const ANONYMOUS_IDENTIFIER: &str = "anonymous";

/// Identifier for the process-wide LLM upstream budget, independent of any
/// client identity.
pub const LLM_GLOBAL_IDENTIFIER: &str = "llm:global";

/// Immutable per-traffic-class limit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateLimitPolicy {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }
}

/// Outcome of a rate check. Carries everything the caller needs to build
/// `X-RateLimit-*` headers and a `Retry-After` hint.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at_millis: u64,
}

impl RateLimitDecision {
    /// Seconds until the current window resets, rounded up, for `Retry-After`.
    pub fn retry_after_secs(&self) -> u64 {
        let now = now_millis();
        self.reset_at_millis.saturating_sub(now).div_ceil(1000)
    }
}

/// One active counting window for an identifier.
#[derive(Debug)]
struct Window {
    count: u32,
    reset_at_millis: u64,
}

struct LimiterState {
    windows: HashMap<String, Window>,
    last_sweep_millis: u64,
}

/// Process-wide fixed-window rate limiter.
///
/// One instance serves every traffic class; callers namespace identifiers
/// per policy (e.g. `ai:1.2.3.4` vs `api:1.2.3.4`) so windows with
/// different durations never collide on a key.
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    cleanup_interval_millis: u64,
}

impl RateLimiter {
    pub fn new(cleanup_interval_secs: u64) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                windows: HashMap::new(),
                last_sweep_millis: 0,
            }),
            cleanup_interval_millis: cleanup_interval_secs.saturating_mul(1000),
        }
    }

    /// Count a request against `identifier` and decide whether it is allowed.
    ///
    /// The call itself always counts, allowed or not. A missing or stale
    /// window is replaced with a fresh one starting now; a live window is
    /// incremented in place.
    pub fn check(&self, identifier: &str, policy: &RateLimitPolicy) -> RateLimitDecision {
        let now = now_millis();
        let mut state = self.state.lock().expect("rate limiter lock poisoned");

        self.maybe_sweep(&mut state, now);

        let window = state.windows.entry(identifier.to_string()).or_insert(Window {
            count: 0,
            reset_at_millis: now + policy.window_secs.saturating_mul(1000),
        });

        // A stale window is replaced, never incremented in place.
        if now >= window.reset_at_millis {
            window.count = 0;
            window.reset_at_millis = now + policy.window_secs.saturating_mul(1000);
        }

        window.count = window.count.saturating_add(1);

        let allowed = window.count <= policy.max_requests;
        let remaining = policy.max_requests.saturating_sub(window.count);

        RateLimitDecision {
            allowed,
            limit: policy.max_requests,
            remaining,
            reset_at_millis: window.reset_at_millis,
        }
    }

    /// Drop every window whose reset time has already passed.
    ///
    /// Runs at most once per cleanup interval, piggybacked on `check` calls.
    /// Best-effort housekeeping only: `check` treats stale windows as expired
    /// regardless of sweep timing.
    fn maybe_sweep(&self, state: &mut LimiterState, now: u64) {
        if now.saturating_sub(state.last_sweep_millis) < self.cleanup_interval_millis {
            return;
        }
        state.last_sweep_millis = now;
        let before = state.windows.len();
        state.windows.retain(|_, w| w.reset_at_millis > now);
        let swept = before - state.windows.len();
        if swept > 0 {
            debug!(swept, "swept expired rate-limit windows");
        }
    }

    /// Number of tracked windows, expired or not.
    pub fn window_count(&self) -> usize {
        self.state
            .lock()
            .expect("rate limiter lock poisoned")
            .windows
            .len()
    }

    /// Shift a window's reset time into the past. Test-only clock control.
    #[cfg(test)]
    fn backdate(&self, identifier: &str, millis: u64) {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        if let Some(w) = state.windows.get_mut(identifier) {
            w.reset_at_millis = w.reset_at_millis.saturating_sub(millis);
        }
    }
}

/// Derive the client identifier for rate limiting from request headers.
///
/// Trusts the first address in the `x-forwarded-for` chain (reverse-proxy
/// deployment assumption). Traffic without the header shares the
/// [`ANONYMOUS_IDENTIFIER`] bucket.
pub fn client_identifier(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| ANONYMOUS_IDENTIFIER.to_string())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
