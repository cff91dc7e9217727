//! Timeout defaults and an async wrapper mapping elapsed deadlines to
//! `ProtocolError::Timeout`.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Time a connection may spend unauthenticated
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Disconnect after this long without inbound frames
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// How long shutdown waits for active connections
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval of the actor's housekeeping tick
pub const TIMER_TICK: Duration = Duration::from_millis(250);

/// Run `future`, failing with `ProtocolError::Timeout` after `duration`.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
