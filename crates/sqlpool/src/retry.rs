//! Retry policy and backoff.
//!
//! One [`RetryPolicy`] drives both connection establishment and operation
//! retries. Delays grow geometrically, `delay_i = base_delay * multiplier^i`,
//! and the first retry already waits `base_delay`.

use std::fmt;
use std::time::Duration;

/// Default number of attempts for connects and operations.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff base, used both as seconds of first delay and as multiplier.
pub const DEFAULT_BACKOFF_BASE: f64 = 1.5;

/// Retry policy for transient (connectivity-class) failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (default: 3).
    pub max_retries: u32,
    /// Delay before the first retry (default: 1.5s).
    pub base_delay: Duration,
    /// Multiplier applied to the delay after every retry (default: 1.5).
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_backoff_base(DEFAULT_BACKOFF_BASE)
    }
}

impl RetryPolicy {
    /// Create a new retry policy with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy where `base` is both the first delay in seconds and the multiplier.
    ///
    /// Negative or non-finite bases fall back to the default. A base too large
    /// for a [`Duration`] saturates the first delay at [`Duration::MAX`].
    #[must_use]
    pub fn from_backoff_base(base: f64) -> Self {
        let base = if base.is_finite() && base >= 0.0 {
            base
        } else {
            DEFAULT_BACKOFF_BASE
        };
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::try_from_secs_f64(base).unwrap_or(Duration::MAX),
            backoff_multiplier: base,
        }
    }

    /// Fallible form of [`RetryPolicy::from_backoff_base`] for untrusted input.
    ///
    /// Rejects negative, non-finite and out-of-range bases with
    /// [`Error::Config`](crate::error::Error::Config).
    pub fn try_from_backoff_base(base: f64) -> Result<Self, crate::error::Error> {
        let base_delay = Duration::try_from_secs_f64(base).map_err(|_| {
            crate::error::Error::Config(format!("invalid retry backoff base: {base}"))
        })?;
        Ok(Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay,
            backoff_multiplier: base,
        })
    }

    /// Set the maximum number of attempts.
    #[must_use]
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay before retry number `retry` (zero-based).
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp = i32::try_from(retry).unwrap_or(i32::MAX);
        scale(self.base_delay, self.backoff_multiplier.powi(exp))
    }

    /// Start a fresh backoff sequence.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.base_delay,
            multiplier: self.backoff_multiplier,
        }
    }

    /// Validate the policy.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.max_retries == 0 {
            return Err(crate::error::Error::Config(
                "max_retries must be greater than 0".into(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(crate::error::Error::Config(
                "backoff_multiplier must be a finite value >= 1.0".into(),
            ));
        }
        Ok(())
    }
}

fn scale(delay: Duration, factor: f64) -> Duration {
    let secs = delay.as_secs_f64() * factor;
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Geometric delay sequence produced by [`RetryPolicy::backoff`].
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    multiplier: f64,
}

impl Backoff {
    /// Return the current delay and advance to the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = scale(self.next, self.multiplier);
        delay
    }

    /// The delay the next call to [`Backoff::next_delay`] will return.
    #[must_use]
    pub fn peek(&self) -> Duration {
        self.next
    }
}

/// Blocks the calling thread between retries.
pub trait Sleep: Send + Sync + fmt::Debug {
    /// Block for `duration`.
    fn sleep(&self, duration: Duration);
}

/// [`Sleep`] backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}
