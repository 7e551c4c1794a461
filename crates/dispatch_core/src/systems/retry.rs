use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::context::DispatchContext;
use crate::error::DispatchError;

/// Run a store transaction, retrying with exponential backoff while it fails
/// on lock contention.
///
/// Attempts and the initial backoff come from the config; the delay doubles
/// after every failed attempt. Any error other than contention returns at
/// once. Running out of attempts yields [`DispatchError::DispatchFailed`].
pub async fn retry_on_contention<T, F>(
    ctx: &Arc<DispatchContext>,
    operation: &'static str,
    work: F,
) -> Result<T, DispatchError>
where
    F: Fn(&DispatchContext) -> Result<T, DispatchError> + Clone + Send + 'static,
    T: Send + 'static,
{
    let attempts = ctx.config.commit_attempts.max(1);
    let mut backoff = ctx.config.commit_backoff();
    let mut attempt = 1;
    loop {
        match ctx.blocking(work.clone()).await {
            Err(DispatchError::Contention(cause)) => {
                if attempt >= attempts {
                    ctx.telemetry.record_dispatch_failure();
                    warn!(operation, attempts, error = %cause, "giving up after repeated contention");
                    return Err(DispatchError::DispatchFailed {
                        attempts,
                        last: cause,
                    });
                }
                ctx.telemetry.record_contention_retry();
                debug!(operation, attempt, ?backoff, error = %cause, "contention, retrying");
                sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}
