//! Retry decisions and backoff for queue items

use std::time::Duration;

use rand::Rng;

use crate::config::QueueConfig;
use crate::types::PlatformResult;

/// Exponential backoff with a ceiling
///
/// `delay(n) = base * 2^(n-1)`, capped at `max`. With jitter on, up to 25%
/// of the delay is added at random, still capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

/// What to do with an item after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to pending, due after `delay`
    Retry { retry_count: u32, delay: Duration },
    /// Permanently failed
    GiveUp { retry_count: u32 },
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            base_delay: Duration::from_secs(config.base_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
            jitter: config.jitter,
        }
    }

    /// Delay before attempt number `retry_count + 1`
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .checked_mul(1_u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter || delay.is_zero() {
            return delay;
        }

        let extra = rand::thread_rng().gen_range(0.0..=0.25);
        delay.mul_f64(1.0 + extra).min(self.max_delay)
    }

    /// Apply the failure rule to an item that just failed
    ///
    /// The count is bumped (never past `max_retries`); only retryable
    /// failures with budget left go back to pending.
    pub fn decide(&self, result: &PlatformResult, retry_count: u32, max_retries: u32) -> RetryDecision {
        let next = retry_count.saturating_add(1).min(max_retries);
        if result.is_retryable() && next < max_retries {
            RetryDecision::Retry {
                retry_count: next,
                delay: self.backoff(next),
            }
        } else {
            RetryDecision::GiveUp { retry_count: next }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}
