use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::error::LedgerError;

/// Ограниченные повторы при транзиентных сбоях хранилища.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Всего попыток, включая первую.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Пауза перед повтором после неудачной попытки `attempt` (с 1):
    /// base, 2*base, 4*base... но не больше max_delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Выполняет `op`, пока не будет успеха, нетранзиентной ошибки или пока не
/// кончатся попытки. Бизнес-ошибки возвращаются сразу.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let mut attempt = 1;

    loop {
        match op().await {
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient store failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) if err.is_transient() => {
                error!(operation, attempts = attempt, error = %err, "giving up after retries");
                return Err(err);
            }
            result => return result,
        }
    }
}
