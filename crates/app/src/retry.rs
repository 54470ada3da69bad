use std::{future::Future, time::Duration};

use metrics::counter;
use tracing::warn;

use payroll_util::PayrollSettings;

/// Errors that can tell a busy/locked database apart from a real failure.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Bounded exponential backoff for whole storage units of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    retries: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self { retries, backoff }
    }

    pub fn from_settings(settings: &PayrollSettings) -> Self {
        Self::new(settings.storage_retries, settings.retry_backoff)
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Runs `unit` until it succeeds, fails for good, or the retries are used up.
    ///
    /// Each attempt must be self-contained: its transaction is rolled back
    /// before the error reaches this loop.
    pub async fn run<T, E, F, Fut>(&self, op: &'static str, mut unit: F) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match unit().await {
                Err(err) if err.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    counter!("storage_retry_total", "op" => op).increment(1);
                    warn!(
                        stage = "storage",
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient storage failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}
