use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};
use tracing::debug;

use crate::error::DeviceError;

fn held_devices() -> &'static Mutex<HashSet<String>> {
    static HELD: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    HELD.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Exclusive claim on a physical audio device within this process
///
/// Released synchronously on drop, so a stopped session frees its device
/// before the next session can ask for it.
#[derive(Debug)]
pub struct DeviceLease {
    device_id: String,
}

impl DeviceLease {
    pub fn acquire(device_id: &str) -> Result<Self, DeviceError> {
        let mut held = held_devices()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !held.insert(device_id.to_string()) {
            return Err(DeviceError::Busy(device_id.to_string()));
        }

        debug!("Acquired device lease: {}", device_id);
        Ok(Self {
            device_id: device_id.to_string(),
        })
    }

    pub fn is_held(device_id: &str) -> bool {
        held_devices()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(device_id)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        held_devices()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.device_id);
        debug!("Released device lease: {}", self.device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_busy_until_release() {
        let id = "test:lease-busy";
        let lease = DeviceLease::acquire(id).unwrap();
        assert_eq!(DeviceLease::acquire(id).unwrap_err(), DeviceError::Busy(id.to_string()));

        drop(lease);
        assert!(!DeviceLease::is_held(id));
        assert!(DeviceLease::acquire(id).is_ok());
    }
}
