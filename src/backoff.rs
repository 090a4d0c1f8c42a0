//! Backoff policy for failed messages and reconnect attempts.
//!
//! The delay doubles with each consecutive failure:
//!
//! ```text
//! delay = base_delay * 2^min(consecutive_failures, max_exponent), clamped to max_delay
//! ```
//!
//! A success resets the failure count, so the next failure starts from
//! `base_delay` again. While failures are outstanding the policy also hints
//! that flow-control credit should drop to a single message, so the consumer
//! feeds the handler one message at a time until it recovers.

use std::time::Duration;

/// Default delay for the first failure.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound on any computed delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10 * 60);

/// Default cap on the doubling exponent.
pub const DEFAULT_MAX_EXPONENT: u32 = 10;

/// RDY hint while backed off.
pub const THROTTLED_RDY: u32 = 1;

/// Tunables for [`BackoffPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Cap on the doubling exponent.
    pub max_exponent: u32,
    /// RDY hint while no failure is outstanding.
    pub max_rdy: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_exponent: DEFAULT_MAX_EXPONENT,
            max_rdy: 1,
        }
    }
}

/// Exponential backoff state.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    consecutive_failures: u32,
    current_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
            current_delay: Duration::ZERO,
        }
    }

    /// Record a confirmed success; the delay drops back to zero.
    pub fn on_success(&mut self) {
        if self.consecutive_failures > 0 {
            tracing::debug!(
                failures = self.consecutive_failures,
                "backoff reset after success"
            );
        }
        self.consecutive_failures = 0;
        self.current_delay = Duration::ZERO;
    }

    /// Record a failure and return the delay to apply to it.
    ///
    /// The first failure after a success yields `base_delay`.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.delay_for(self.consecutive_failures);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.current_delay = delay;
        tracing::debug!(
            failures = self.consecutive_failures,
            delay_ms = delay.as_millis() as u64,
            "backoff increased"
        );
        delay
    }

    /// Flow-control credit to declare given the failure history.
    pub fn current_rdy_hint(&self) -> u32 {
        if self.consecutive_failures > 0 {
            THROTTLED_RDY.min(self.config.max_rdy)
        } else {
            self.config.max_rdy
        }
    }

    /// Delay returned by the most recent failure, zero after a success.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_backed_off(&self) -> bool {
        self.consecutive_failures > 0
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.min(self.config.max_exponent).min(31);
        let factor = 1u32 << exponent;
        self.config
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
