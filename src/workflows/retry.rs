// Bounded retry of whole transactions lost to concurrent writers

use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

use crate::errors::WorkflowError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(200),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retries immediately, for tests and batch replays.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Wait before each retry: 2x, 4x, 8x ... the base delay, capped.
    pub fn delays(&self) -> Vec<Duration> {
        let base_ms = self.base_delay.as_millis() as u64;
        ExponentialBackoff::from_millis(2)
            .factor(base_ms)
            .max_delay(self.max_delay)
            .map(|delay| if self.jitter { jitter(delay) } else { delay })
            .take(self.max_retries as usize)
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryHandler {
    config: RetryConfig,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `attempt` until it succeeds, fails with a non-retryable error, or
    /// the retry budget is spent. `attempt` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> Result<T, WorkflowError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, WorkflowError>>,
    {
        let mut number = 0u32;
        let result = RetryIf::start(
            self.config.delays(),
            || {
                number += 1;
                tracing::Span::current().record("attempts", number);
                if number > 1 {
                    debug!(attempt = number, "retrying after transaction conflict");
                }
                attempt(number)
            },
            |err: &WorkflowError| err.is_retryable(),
        )
        .await;

        if let Err(err) = &result {
            if err.is_retryable() {
                warn!(
                    max_retries = self.config.max_retries,
                    error = %err,
                    "giving up after repeated transaction conflicts"
                );
            }
        }
        result
    }
}
