use crate::protocol::Field;
use crate::subscription::StatusReceiver;
use crate::types::{DeviceStatus, Power};
use std::sync::Mutex;
use std::time::SystemTime;
use tokio::sync::broadcast;

/// Capacity of the status update channel
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Last-known status of one processor
///
/// Every write goes through `apply` or `set_available`; subscribers are only
/// notified when a snapshot differs from the previous one in something other
/// than its timestamp.
pub struct DeviceState {
    status: Mutex<DeviceStatus>,
    update_tx: broadcast::Sender<DeviceStatus>,
}

impl DeviceState {
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            status: Mutex::new(DeviceStatus::new()),
            update_tx,
        }
    }

    /// Immutable copy of the current status
    pub fn snapshot(&self) -> DeviceStatus {
        self.lock().clone()
    }

    /// Receive a snapshot after every actual change
    pub fn subscribe(&self) -> StatusReceiver {
        StatusReceiver::new(self.update_tx.subscribe())
    }

    /// Update exactly one field and stamp the update time
    ///
    /// Returns whether the status changed.
    pub fn apply(&self, field: Field) -> bool {
        self.update(|status| match field {
            Field::Power(power) => status.power = power,
            Field::Volume(db) => status.volume_db = Some(db),
            Field::Mute(muted) => status.muted = Some(muted),
            Field::Input(input) => status.input = Some(input),
            Field::ProcessorState(code) => status.processor_state = Some(code),
        })
    }

    /// Mark the processor reachable or not
    pub fn set_available(&self, available: bool) -> bool {
        self.update(|status| status.available = available)
    }

    pub fn power(&self) -> Power {
        self.lock().power
    }

    pub fn processor_state(&self) -> Option<u8> {
        self.lock().processor_state
    }

    fn update(&self, change: impl FnOnce(&mut DeviceStatus)) -> bool {
        let notification = {
            let mut status = self.lock();
            let before = status.clone();
            change(&mut status);
            status.last_updated = Some(SystemTime::now());

            if status.same_state(&before) {
                None
            } else {
                Some(status.clone())
            }
        };

        match notification {
            Some(status) => {
                tracing::debug!("Status changed: {:?}", status);
                // No receivers is fine.
                let _ = self.update_tx.send(status);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DeviceStatus> {
        // Status writes cannot panic midway, so a poisoned lock still holds a valid value.
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}
