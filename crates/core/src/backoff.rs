//! Retry backoff policies.

use serde::{Deserialize, Serialize};

/// Rule computing how long a failed job waits before it is eligible again.
///
/// Serialized as `{"type":"fixed","delay":5000}`. A missing `delay` falls back
/// to the job's own configured delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay for every retry.
    Fixed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay: Option<u64>,
    },
    /// `round(delay * 0.5 * (2^attempt - 1))`.
    Exponential {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay: Option<u64>,
    },
}

impl Backoff {
    /// Fixed backoff of `delay_ms` milliseconds.
    pub fn fixed(delay_ms: u64) -> Self {
        Self::Fixed {
            delay: Some(delay_ms),
        }
    }

    /// Exponential backoff with base `delay_ms` milliseconds.
    pub fn exponential(delay_ms: u64) -> Self {
        Self::Exponential {
            delay: Some(delay_ms),
        }
    }

    /// Configured delay, if any.
    pub fn delay(&self) -> Option<u64> {
        match self {
            Self::Fixed { delay } | Self::Exponential { delay } => *delay,
        }
    }

    /// Milliseconds to wait before retry number `attempt` (0-based).
    ///
    /// `fallback_ms` is used when the policy carries no delay of its own.
    pub fn compute_delay(&self, attempt: u32, fallback_ms: u64) -> u64 {
        let delay = self.delay().unwrap_or(fallback_ms);
        match self {
            Self::Fixed { .. } => delay,
            Self::Exponential { .. } => {
                let factor = 2f64.powi(attempt.min(62) as i32) - 1.0;
                let ms = (delay as f64 * 0.5 * factor).round();
                if ms >= u64::MAX as f64 {
                    u64::MAX
                } else {
                    ms as u64
                }
            }
        }
    }
}
