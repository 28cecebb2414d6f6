//! Time limits for calls into external services.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{RagError, Result};

/// Run `future` with a time limit, turning a hang into [`RagError::Timeout`].
pub async fn bounded<T, F>(operation: &str, limit: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => {
            let limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
            warn!(operation, limit_ms, "external call timed out");
            Err(RagError::Timeout { operation: operation.to_string(), limit_ms })
        }
    }
}
