//! Retry policy
//!
//! A pure decision function over the closed [`ErrorKind`] taxonomy. The
//! policy never sleeps itself; callers act on the returned [`RetryDecision`].
//!
//! ## Schedule
//!
//! | Kind               | Decision                                                     |
//! |--------------------|--------------------------------------------------------------|
//! | `Transient`        | exponential backoff, `base * 2^(attempt-1)`, capped, jittered |
//! | `RateLimited`      | the remote's retry-after hint, else the exponential schedule |
//! | `ChecksumMismatch` | immediate full re-download until the corruption ceiling      |
//! | everything else    | give up                                                      |
//!
//! Attempt numbers are 1-based: `attempt` is the number of the attempt that
//! just failed. Chunk-level kinds count attempts per chunk; corruption counts
//! per file.

use std::time::Duration;

use cloudmirror_core::config::RetryConfig;
use cloudmirror_core::domain::ErrorKind;

/// Outcome of consulting the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the given delay
    Retry(Duration),
    /// Stop retrying; the failure is final for this run
    GiveUp,
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry(_))
    }
}

/// Backoff and attempt ceilings for one run
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per chunk before giving up (includes the first attempt)
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for computed backoff delays
    pub max_delay: Duration,
    /// Add up to 50% random jitter to computed delays
    pub jitter: bool,
    /// Whole-file checksum mismatches tolerated before giving up
    pub max_corruption_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
            max_corruption_attempts: config.max_corruption_attempts.max(1),
        }
    }

    /// Decide what to do after attempt number `attempt` failed with `kind`
    ///
    /// For `ChecksumMismatch`, `attempt` is the file's corruption count.
    pub fn decide(
        &self,
        kind: ErrorKind,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        let fraction = if self.jitter { rand::random::<f64>() } else { 0.0 };
        self.decide_with_jitter(kind, attempt, retry_after, fraction)
    }

    /// Deterministic form of [`decide`](Self::decide)
    ///
    /// `jitter_fraction` in `[0, 1)` selects how much of the jitter window is
    /// added to an exponential delay.
    pub fn decide_with_jitter(
        &self,
        kind: ErrorKind,
        attempt: u32,
        retry_after: Option<Duration>,
        jitter_fraction: f64,
    ) -> RetryDecision {
        match kind {
            ErrorKind::Transient => {
                if attempt >= self.max_attempts {
                    return RetryDecision::GiveUp;
                }
                RetryDecision::Retry(self.jittered(self.backoff_delay(attempt), jitter_fraction))
            }
            ErrorKind::RateLimited => {
                if attempt >= self.max_attempts {
                    return RetryDecision::GiveUp;
                }
                match retry_after {
                    Some(hint) => RetryDecision::Retry(hint),
                    None => RetryDecision::Retry(
                        self.jittered(self.backoff_delay(attempt), jitter_fraction),
                    ),
                }
            }
            ErrorKind::ChecksumMismatch => {
                if attempt < self.max_corruption_attempts {
                    RetryDecision::Retry(Duration::ZERO)
                } else {
                    RetryDecision::GiveUp
                }
            }
            ErrorKind::AuthExpired
            | ErrorKind::NotFound
            | ErrorKind::PermissionDenied
            | ErrorKind::LocalIo => RetryDecision::GiveUp,
        }
    }

    /// Un-jittered exponential delay after failed attempt `attempt`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let multiplier = 2u32.saturating_pow(exponent);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jittered(&self, delay: Duration, fraction: f64) -> Duration {
        if !self.jitter || fraction <= 0.0 {
            return delay;
        }
        let fraction = fraction.min(1.0);
        delay.mul_f64(1.0 + 0.5 * fraction).min(self.max_delay)
    }
}
