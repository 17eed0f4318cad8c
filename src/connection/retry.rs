use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

/// Strategy deciding whether and when a failed attempt is retried.
///
/// `attempt` is 1-indexed: the delay returned for attempt `n` is the pause
/// after the `n`-th failure. Returning `None` stops retrying.
pub trait RetryPolicy: Debug + Send + Sync {
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Retries exactly once after a fixed pause.
#[derive(Debug, Clone)]
pub struct RetryOneTime {
    pub delay: Duration,
}

impl RetryOneTime {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl RetryPolicy for RetryOneTime {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt <= 1).then_some(self.delay)
    }
}

/// Retries with a fixed pause, without limit.
#[derive(Debug, Clone)]
pub struct RetryForever {
    pub delay: Duration,
}

impl RetryPolicy for RetryForever {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        Some(self.delay)
    }
}

/// Exponential backoff capped at `max_delay`.
///
/// delay(n) = min(initial * multiplier^(n-1), max_delay)
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
            max_attempts: None,
        }
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }

        let exponent = (attempt - 1).min(63) as i32;
        let scaled = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_nanos() as f64);
        Some(Duration::from_nanos(capped.round() as u64))
    }
}

/// Serializable description of a retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryConfig {
    OneTime {
        delay_ms: u64,
    },
    Forever {
        delay_ms: u64,
    },
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        multiplier: f64,
        #[serde(default)]
        max_attempts: Option<u32>,
    },
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::Exponential {
            initial_ms: 100,
            max_ms: 5_000,
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl RetryConfig {
    /// Builds the policy this configuration describes.
    pub fn build(&self) -> Box<dyn RetryPolicy> {
        match self {
            Self::OneTime { delay_ms } => Box::new(RetryOneTime::new(Duration::from_millis(*delay_ms))),
            Self::Forever { delay_ms } => Box::new(RetryForever {
                delay: Duration::from_millis(*delay_ms),
            }),
            Self::Exponential {
                initial_ms,
                max_ms,
                multiplier,
                max_attempts,
            } => {
                let mut policy = ExponentialBackoff::new(
                    Duration::from_millis(*initial_ms),
                    Duration::from_millis(*max_ms),
                )
                .multiplier(*multiplier);
                policy.max_attempts = *max_attempts;
                Box::new(policy)
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Exponential {
                initial_ms,
                max_ms,
                multiplier,
                ..
            } => {
                if *initial_ms == 0 {
                    return Err("retry initial delay must be > 0".to_string());
                }
                if max_ms < initial_ms {
                    return Err("retry max delay cannot be below the initial delay".to_string());
                }
                if !multiplier.is_finite() || *multiplier < 1.0 {
                    return Err("retry multiplier must be >= 1.0".to_string());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
