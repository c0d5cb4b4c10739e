use std::time::Duration;

use tracing::warn;

use super::{ExtractionClient, ExtractionError, RawModelResponse};

/// Caller-owned retry policy for model calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (1-based retry index): base, 2*base, 4*base...
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(16))
    }
}

/// Invokes the client, retrying transport failures with exponential backoff.
/// Certificate and provider failures are returned after the first attempt.
pub async fn invoke_with_retry(
    client: &dyn ExtractionClient,
    prompt: &str,
    policy: RetryPolicy,
) -> Result<RawModelResponse, ExtractionError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            warn!(
                "LLM call attempt {} failed with a transport error, retrying after {}ms...",
                attempt,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
        attempt += 1;

        match client.invoke(prompt).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && attempt < max_attempts => continue,
            Err(e) => return Err(e),
        }
    }
}
