//! Bounded, retrying calls into the persistence collaborator.

use std::future::Future;
use std::time::Duration;

use crate::config::PersistenceConfig;
use crate::core::StoreError;

/// Run a store call under the configured timeout, retrying
/// [`StoreError::Unavailable`] with exponential backoff.
///
/// Conflicts and missing records are definitive and returned immediately.
/// Store writes are keyed by id or date, so repeating one is safe.
pub async fn call_store<T, F, Fut>(
    policy: &PersistenceConfig,
    op: &'static str,
    mut call: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let timeout = Duration::from_millis(policy.timeout_ms);
    let mut attempt: u32 = 0;
    loop {
        let result = match tokio::time::timeout(timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "{op} timed out after {}ms",
                policy.timeout_ms
            ))),
        };
        match result {
            Err(StoreError::Unavailable(reason)) if attempt < policy.max_retries => {
                let delay = policy
                    .retry_base_ms
                    .saturating_mul(1_u64 << attempt.min(16));
                tracing::warn!(op, attempt, delay_ms = delay, %reason, "store call failed, retrying");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
