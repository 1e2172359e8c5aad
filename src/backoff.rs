use serde::{Deserialize, Serialize};

/// How the delay before a retry grows with the attempt count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Every retry waits `base`.
    Fixed,
    /// Retry `k` waits `base * k`.
    Linear,
    /// Retry `k` waits `base * 2^(k-1)`.
    #[default]
    Exponential,
}

impl BackoffStrategy {
    /// Delay in milliseconds before the next run of a job that has been
    /// dispatched `attempt` times. Saturates instead of overflowing.
    pub fn delay_ms(self, base_ms: u64, attempt: u32) -> u64 {
        let attempt = attempt.max(1);
        match self {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Linear => base_ms.saturating_mul(u64::from(attempt)),
            BackoffStrategy::Exponential => {
                let factor = 1_u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                base_ms.saturating_mul(factor)
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackoffStrategy::Fixed => "fixed",
            BackoffStrategy::Linear => "linear",
            BackoffStrategy::Exponential => "exponential",
        }
    }
}

impl std::fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackoffStrategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(BackoffStrategy::Fixed),
            "linear" => Ok(BackoffStrategy::Linear),
            "exponential" => Ok(BackoffStrategy::Exponential),
            other => Err(crate::Error::Config(format!(
                "unknown backoff strategy '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_saturates_on_huge_attempts() {
        assert_eq!(BackoffStrategy::Exponential.delay_ms(1000, 200), u64::MAX);
        assert_eq!(BackoffStrategy::Linear.delay_ms(u64::MAX, 3), u64::MAX);
    }

    #[test]
    fn attempt_zero_is_treated_as_first_attempt() {
        assert_eq!(BackoffStrategy::Exponential.delay_ms(100, 0), 100);
        assert_eq!(BackoffStrategy::Linear.delay_ms(100, 0), 100);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(
            "Linear".parse::<BackoffStrategy>().unwrap(),
            BackoffStrategy::Linear
        );
        assert!("quadratic".parse::<BackoffStrategy>().is_err());
    }
}
