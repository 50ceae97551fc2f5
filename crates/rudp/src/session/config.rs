use std::time::Duration;

pub const DEFAULT_RETRANSMISSION_INTERVAL_MS: u64 = 200;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 3000;

/// How many times an unacknowledged message is resent before it is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryBudget {
    #[default]
    Unlimited,
    Disabled,
    Limited(u32),
}

impl RetryBudget {
    /// Maps the classic count convention: -1 unlimited, 0 disabled, N limited.
    /// Any other negative value is treated as unlimited.
    pub fn from_count(count: i64) -> Self {
        match count {
            0 => RetryBudget::Disabled,
            n if n < 0 => RetryBudget::Unlimited,
            n => RetryBudget::Limited(u32::try_from(n).unwrap_or(u32::MAX)),
        }
    }

    pub fn as_count(&self) -> i64 {
        match self {
            RetryBudget::Unlimited => -1,
            RetryBudget::Disabled => 0,
            RetryBudget::Limited(n) => i64::from(*n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub retry: RetryBudget,
    pub retransmission_interval: Duration,
    /// How long the oldest out-of-order packet may wait for its predecessors.
    pub read_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry: RetryBudget::Unlimited,
            retransmission_interval: Duration::from_millis(DEFAULT_RETRANSMISSION_INTERVAL_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }
}
