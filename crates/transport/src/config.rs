//! Transport configuration

use std::time::Duration;

/// Flush and backpressure thresholds for the stream buffer
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Accumulate at least this many bytes before a batch is ready
    pub min_bytes: u64,

    /// Suspend the producer once this many bytes are buffered.
    /// Resolves to `min_bytes` when unset.
    pub max_bytes: Option<u64>,

    /// Flush a partially-filled buffer if no new data arrives for this long
    pub max_idle_time: Duration,

    /// Upper bound on how long a consumer waits before the buffer flushes
    /// whatever it holds
    pub max_wait_time: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            min_bytes: 10 * 1024 * 1024,
            max_bytes: None,
            max_idle_time: Duration::from_millis(300),
            max_wait_time: Duration::from_secs(5),
        }
    }
}

impl BufferConfig {
    /// Set the flush threshold. The backpressure ceiling tracks it unless
    /// [`BufferConfig::with_max_bytes`] was set explicitly.
    pub fn with_min_bytes(mut self, min_bytes: u64) -> Self {
        self.min_bytes = min_bytes;
        self
    }

    /// Set the backpressure ceiling
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Backpressure ceiling in effect, `min_bytes` when none was set
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes.unwrap_or(self.min_bytes)
    }

    /// Set the idle flush timeout
    pub fn with_max_idle_time(mut self, max_idle_time: Duration) -> Self {
        self.max_idle_time = max_idle_time;
        self
    }

    /// Set the consumer wait bound
    pub fn with_max_wait_time(mut self, max_wait_time: Duration) -> Self {
        self.max_wait_time = max_wait_time;
        self
    }

    /// Validate threshold ordering
    pub fn validate(&self) -> Result<(), String> {
        if self.min_bytes == 0 {
            return Err("min_bytes must be > 0".into());
        }
        if self.max_bytes() < self.min_bytes {
            return Err(format!(
                "max_bytes ({}) must be >= min_bytes ({})",
                self.max_bytes(),
                self.min_bytes
            ));
        }
        Ok(())
    }
}

/// Retry policy for transient portal request failures
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retry attempts before the stream fails
    pub max_attempts: u32,

    /// Base delay for exponential backoff (doubles each retry)
    pub base_delay: Duration,

    /// Cap on the backoff delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(64),
        }
    }
}

impl RetryConfig {
    /// Backoff delay for retry attempt N (0-based), exponential and capped
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(6);
        (self.base_delay * factor).min(self.max_delay)
    }
}

/// Full configuration of one portal stream
#[derive(Debug, Clone, Default)]
pub struct PortalStreamConfig {
    /// Buffer thresholds
    pub buffer: BufferConfig,

    /// Transient-failure retry policy
    pub retry: RetryConfig,

    /// When caught up to the head, wait this long and re-request.
    /// `None` ends the stream instead of polling.
    pub head_poll_interval: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_bytes_follows_min_bytes() {
        let config = BufferConfig::default().with_min_bytes(100);
        assert_eq!(config.max_bytes(), 100);

        // Lowering min_bytes lowers the unset ceiling with it
        let config = BufferConfig {
            min_bytes: 100,
            ..BufferConfig::default()
        };
        assert_eq!(config.max_bytes(), 100);

        let config = BufferConfig::default()
            .with_min_bytes(100)
            .with_max_bytes(500);
        assert_eq!(config.max_bytes(), 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        let config = BufferConfig::default()
            .with_min_bytes(100)
            .with_max_bytes(50);
        assert!(config.validate().is_err());
    }

    #[test]
    fn retry_delay_is_exponential_and_capped() {
        let retry = RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        };
        assert_eq!(retry.delay(0), Duration::from_secs(1));
        assert_eq!(retry.delay(1), Duration::from_secs(2));
        assert_eq!(retry.delay(2), Duration::from_secs(4));
        assert_eq!(retry.delay(3), Duration::from_secs(8));
        assert_eq!(retry.delay(6), Duration::from_secs(8));
        assert_eq!(retry.delay(60), Duration::from_secs(8));
    }
}
