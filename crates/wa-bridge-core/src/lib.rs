//! Core abstractions for the wa-bridge session gateway.
//!
//! This crate provides the fundamental building blocks:
//! - `RemoteSession` - The connection to the remote messaging service
//! - `CredentialStore` - Durable device credentials
//! - `PairingEvent` / `InboundEvent` - What the remote pushes to us
//! - `LoopbackRemote` - In-process remote (feature: loopback)

pub mod device;
pub mod events;
#[cfg(feature = "loopback")]
pub mod loopback;
pub mod traits;

pub use device::{DeviceId, DeviceRecord};
pub use events::{EventKind, InboundEvent, MessageEvent, PairingEvent, ReceiptEvent};
#[cfg(feature = "loopback")]
pub use loopback::{LoopbackRemote, PairingScript};
pub use traits::{CredentialStore, PhoneStatus, ProtocolError, RemoteSession, StoreError};
