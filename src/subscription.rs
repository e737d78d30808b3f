use crate::error::{Result, StormError};
use crate::types::DeviceStatus;
use tokio::sync::broadcast;

/// Receiver for status snapshots
///
/// A snapshot is delivered only when the status actually changed.
pub struct StatusReceiver {
    rx: broadcast::Receiver<DeviceStatus>,
}

impl StatusReceiver {
    /// Create a new status receiver
    pub(crate) fn new(rx: broadcast::Receiver<DeviceStatus>) -> Self {
        Self { rx }
    }

    /// Receive the next status snapshot
    ///
    /// A receiver that fell behind skips to the oldest retained snapshot
    /// instead of failing.
    pub async fn recv(&mut self) -> Result<DeviceStatus> {
        loop {
            match self.rx.recv().await {
                Ok(status) => return Ok(status),
                Err(broadcast::error::RecvError::Closed) => return Err(StormError::ConnectionClosed),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Status receiver lagged by {} snapshot(s)", n);
                }
            }
        }
    }

    /// Try to receive a status snapshot without blocking
    ///
    /// Returns `None` if no snapshot is available.
    pub fn try_recv(&mut self) -> Result<Option<DeviceStatus>> {
        loop {
            match self.rx.try_recv() {
                Ok(status) => return Ok(Some(status)),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(StormError::ConnectionClosed)
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::debug!("Status receiver lagged by {} snapshot(s)", n);
                }
            }
        }
    }
}
