//! Device credentials the session is built from.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Device identifier.
pub type DeviceId = Uuid;

/// Credential record for one linked device.
///
/// The contents are owned by the remote protocol; the gateway only
/// loads a record at startup and hands it to the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Local identifier of the record.
    pub id: DeviceId,
    /// Address assigned by the service once the device is paired.
    pub jid: Option<String>,
    /// Display name pushed by the service.
    pub push_name: Option<String>,
    /// Opaque identity key material.
    #[serde(default)]
    pub identity_key: Vec<u8>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
}

impl DeviceRecord {
    /// Create a fresh, unpaired device with new identity material.
    #[must_use]
    pub fn new() -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            jid: None,
            push_name: None,
            identity_key: Uuid::new_v4().as_bytes().to_vec(),
            created_at: now(),
        }
    }

    /// Whether the service has already accepted this device.
    #[must_use]
    pub const fn is_paired(&self) -> bool {
        self.jid.is_some()
    }

    /// Mark the device as paired under `jid`.
    #[must_use]
    pub fn with_jid(mut self, jid: impl Into<String>) -> Self {
        self.jid = Some(jid.into());
        self
    }
}

impl Default for DeviceRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Current Unix time in seconds.
#[must_use]
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
