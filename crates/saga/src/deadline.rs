//! Deadline helper shared by every remote call.

use std::future::Future;
use std::time::Duration;

use crate::error::SagaError;

/// Runs `fut` under a deadline, mapping expiry to [`SagaError::Timeout`].
pub async fn with_deadline<T, E, F>(
    operation: &'static str,
    after: Duration,
    fut: F,
) -> Result<T, SagaError>
where
    F: Future<Output = Result<T, E>>,
    SagaError: From<E>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result.map_err(SagaError::from),
        Err(_) => {
            metrics::counter!("deadline_expired_total", "operation" => operation).increment(1);
            Err(SagaError::Timeout { operation, after })
        }
    }
}
