//! Retry policy for apply calls and failure tracking across passes.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::{Error, ErrorKind};

/// Bounded exponential backoff around each resource's apply call.
///
/// Applied uniformly by the controller; errors whose kind is not retryable
/// are returned on the first attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_APPLY_ATTEMPTS,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Backoff before attempt `attempt + 1`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before retrying after `attempt` failed with `err`, or `None` to
    /// give up.
    pub fn next_delay(&self, err: &Error, attempt: u32) -> Option<Duration> {
        if !err.is_retryable() || attempt >= self.max_attempts {
            return None;
        }
        // 0.5x to 1.5x so concurrent passes do not retry in lockstep.
        let jitter = rand::rng().random_range(0.5..1.5);
        Some(Duration::from_secs_f64(
            self.backoff(attempt).as_secs_f64() * jitter,
        ))
    }
}

/// Tracks consecutive failed passes per declared object.
///
/// Once an object exhausts its attempts within the window it is reported as
/// not converged; the count resets after a success or when the window ends.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    max_failures: u32,
    window: Duration,
    failures: BTreeMap<String, FailureRecord>,
}

#[derive(Debug, Clone)]
struct FailureRecord {
    count: u32,
    first: Instant,
    last_kind: ErrorKind,
}

impl RetryTracker {
    pub fn new(max_failures: u32, window: Duration) -> Self {
        Self {
            max_failures,
            window,
            failures: BTreeMap::new(),
        }
    }

    /// Record a failed pass. Returns true once failures are exhausted.
    pub fn record_failure(&mut self, key: &str, kind: ErrorKind) -> bool {
        let now = Instant::now();
        let record = self
            .failures
            .entry(key.to_string())
            .or_insert(FailureRecord {
                count: 0,
                first: now,
                last_kind: kind,
            });

        if now.duration_since(record.first) > self.window {
            record.count = 0;
            record.first = now;
        }

        record.count += 1;
        record.last_kind = kind;
        record.count >= self.max_failures
    }

    pub fn is_exhausted(&self, key: &str) -> bool {
        self.failures.get(key).is_some_and(|record| {
            Instant::now().duration_since(record.first) <= self.window
                && record.count >= self.max_failures
        })
    }

    pub fn last_kind(&self, key: &str) -> Option<ErrorKind> {
        self.failures.get(key).map(|record| record.last_kind)
    }

    /// Forget failures after a successful pass.
    pub fn clear(&mut self, key: &str) {
        self.failures.remove(key);
    }

    /// Drop records whose window has passed.
    pub fn prune(&mut self) {
        let now = Instant::now();
        let window = self.window;
        self.failures
            .retain(|_, record| now.duration_since(record.first) <= window);
    }
}

/// Default apply attempts per resource per pass.
pub const DEFAULT_APPLY_ATTEMPTS: u32 = 3;
