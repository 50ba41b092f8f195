//! In-memory credential store.

use std::sync::RwLock;

use async_trait::async_trait;
use wa_bridge_core::{CredentialStore, DeviceId, DeviceRecord, StoreError};

/// In-memory store implementation.
///
/// Useful for development and tests.
/// Credentials are lost on restart, so every start needs pairing.
pub struct MemoryStore {
    devices: RwLock<Vec<DeviceRecord>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            devices: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn devices(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        let mut devices = self
            .devices
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .clone();

        // Oldest first, like the SQLite store
        devices.sort_by_key(|d| d.created_at);
        Ok(devices)
    }

    async fn save_device(&self, device: &DeviceRecord) -> Result<(), StoreError> {
        let mut devices = self
            .devices
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        if let Some(existing) = devices.iter_mut().find(|d| d.id == device.id) {
            *existing = device.clone();
        } else {
            devices.push(device.clone());
        }

        Ok(())
    }

    async fn delete_device(&self, id: DeviceId) -> Result<(), StoreError> {
        self.devices
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .retain(|d| d.id != id);

        Ok(())
    }
}
