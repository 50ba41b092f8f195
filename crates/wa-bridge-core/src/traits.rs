//! Collaborator traits: the remote session and the credential store.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    device::{DeviceId, DeviceRecord},
    events::{InboundEvent, PairingEvent},
};

/// Registration status of one queried phone number.
///
/// Field names follow the service's own encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneStatus {
    /// The number as it was queried.
    #[serde(rename = "Query")]
    pub query: String,
    /// Address of the account, empty when not registered.
    #[serde(rename = "JID")]
    pub jid: String,
    /// Whether the number is registered.
    #[serde(rename = "IsIn")]
    pub is_in: bool,
    /// Verified business name, if any.
    #[serde(rename = "VerifiedName")]
    pub verified_name: Option<String>,
}

/// Remote protocol error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("not connected")]
    NotConnected,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("already connected")]
    AlreadyConnected,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("connection closed")]
    Closed,
}

/// Credential storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open credential store: {0}")]
    Open(String),
    #[error("no device record available")]
    NoDevice,
    #[error("credential store error: {0}")]
    Internal(String),
}

/// A connection to the remote messaging service.
///
/// One instance exists per process. Implementations are internally
/// synchronized; callers still serialize connect/disconnect themselves.
#[async_trait]
pub trait RemoteSession: Send + Sync + 'static {
    /// Whether the socket is currently open.
    fn is_connected(&self) -> bool;

    /// Whether the device is authenticated with the service.
    fn is_logged_in(&self) -> bool;

    /// Subscribe to pairing progress for the next connect.
    ///
    /// Must be called before [`RemoteSession::connect`]. The channel closes
    /// when the handshake ends or the connection is torn down.
    async fn pairing_events(&self) -> Result<mpsc::Receiver<PairingEvent>, ProtocolError>;

    /// Open the connection.
    async fn connect(&self) -> Result<(), ProtocolError>;

    /// Close the connection. A no-op when already closed.
    async fn disconnect(&self);

    /// Stream of inbound events, live from the moment of the call.
    fn event_stream(&self) -> BoxStream<'static, InboundEvent>;

    /// Look up which of `phones` are registered, in input order.
    async fn is_on_whatsapp(&self, phones: &[String]) -> Result<Vec<PhoneStatus>, ProtocolError>;
}

/// Trait for device credential backends.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// All stored devices, oldest first.
    async fn devices(&self) -> Result<Vec<DeviceRecord>, StoreError>;

    /// Insert or replace a device record.
    async fn save_device(&self, device: &DeviceRecord) -> Result<(), StoreError>;

    /// Remove a device record.
    async fn delete_device(&self, id: DeviceId) -> Result<(), StoreError>;

    /// Release backing resources. Called once, after the session is shut down.
    async fn close(&self) {}

    /// The first stored device, creating and saving a fresh one if the
    /// store is empty.
    async fn first_device(&self) -> Result<DeviceRecord, StoreError> {
        if let Some(device) = self.devices().await?.into_iter().next() {
            return Ok(device);
        }

        let device = DeviceRecord::new();
        self.save_device(&device).await?;
        tracing::info!(device_id = %device.id, "Created new device record");
        Ok(device)
    }
}
