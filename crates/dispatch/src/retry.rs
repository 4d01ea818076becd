//! Retry envelope arithmetic.
//!
//! The orchestrator retries the token-fetch → dispatch path with exponential
//! backoff. A queued job expires upstream after a fixed window, so the envelope
//! is only useful if its projected total wait fits inside that window.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::selector::Finding;
use crate::BackendDescriptor;

/// How long the source-control provider keeps a job queued before abandoning it.
pub const DEFAULT_JOB_QUEUE_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Bounded exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryOptions {
    /// Delay before the first retry, in seconds.
    pub interval_secs: u64,
    /// Multiplier applied to the delay for each further retry. Must be `>= 1`.
    pub backoff_rate: f64,
    /// Number of retries after the first attempt.
    pub max_attempts: u32,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            backoff_rate: 1.3,
            max_attempts: 23,
        }
    }
}

impl RetryOptions {
    /// Returns the first retry delay.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Returns `Some(reason)` if the settings are unusable.
    pub fn invalid_reason(&self) -> Option<String> {
        if !self.backoff_rate.is_finite() || self.backoff_rate < 1.0 {
            return Some(format!(
                "backoff_rate must be a finite number >= 1, got {}",
                self.backoff_rate
            ));
        }
        if self.interval_secs == 0 && self.max_attempts > 0 {
            return Some("interval_secs must be positive when retries are enabled".to_string());
        }
        None
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// Retry `k` waits `interval × backoff_rate^(k−1)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let secs = self.interval_secs as f64 * self.backoff_rate.powi(exponent);
        duration_from_secs_saturating(secs)
    }

    /// Projected worst-case total wait across every retry.
    ///
    /// Uses the closed form `interval × backoff_rate^max_attempts / (backoff_rate − 1)`,
    /// which slightly over-estimates the exact geometric sum and errs on the side
    /// of warning. A rate of exactly 1 degenerates to `interval × max_attempts`.
    pub fn projected_total_wait(&self) -> Duration {
        let interval = self.interval_secs as f64;
        let secs = if (self.backoff_rate - 1.0).abs() < f64::EPSILON {
            interval * f64::from(self.max_attempts)
        } else {
            interval * self.backoff_rate.powi(self.max_attempts as i32) / (self.backoff_rate - 1.0)
        };
        duration_from_secs_saturating(secs)
    }

    /// Returns `true` if the projected total wait outlives a job queued for `expiry`.
    pub fn exceeds(&self, expiry: Duration) -> bool {
        self.projected_total_wait() > expiry
    }
}

/// Checks the global envelope and every per-backend override against the
/// job-queue expiry.
///
/// Unusable settings are errors; an envelope that outlives the expiry is a
/// warning, because the job will have been abandoned upstream before the last
/// retries run.
pub fn retry_budget_findings(
    global: &RetryOptions,
    backends: &[BackendDescriptor],
    expiry: Duration,
) -> Vec<Finding> {
    let effective = std::iter::once(("global retry options".to_string(), global)).chain(
        backends.iter().filter_map(|backend| {
            backend
                .retry
                .as_ref()
                .map(|retry| (format!("retry options of backend '{}'", backend.id), retry))
        }),
    );

    let mut findings = Vec::new();
    for (subject, options) in effective {
        if let Some(reason) = options.invalid_reason() {
            findings.push(Finding::error(format!("{subject}: {reason}")));
        } else if options.exceeds(expiry) {
            findings.push(Finding::warning(format!(
                "{subject}: projected total wait of {}s exceeds the job queue expiry of {}s; \
                 late retries will find the job already expired",
                options.projected_total_wait().as_secs(),
                expiry.as_secs()
            )));
        }
    }
    findings
}

fn duration_from_secs_saturating(secs: f64) -> Duration {
    if !secs.is_finite() || secs >= u64::MAX as f64 {
        Duration::from_secs(u64::MAX)
    } else if secs <= 0.0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
