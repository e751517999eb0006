//! # Timeout Utilities
//!
//! Deadline constants and async timeout wrappers.
//!
//! Every operation deadline used across the crate is defined here so the
//! relay server and clients agree on timing defaults.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Default deadline for a TCP connection attempt
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for a handshake to reach the established state
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between handshake eviction sweeps
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Default deadline for graceful shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run a future under a deadline, mapping expiry to [`ProtocolError::Timeout`].
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_before_deadline() {
        let result = with_timeout(Duration::from_secs(1), async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn expiry_maps_to_timeout_error() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }
}
