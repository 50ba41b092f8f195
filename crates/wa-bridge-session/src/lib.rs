//! Session lifecycle for the wa-bridge gateway.
//!
//! Provides:
//! - `SessionManager` - Own the remote session and serialize access to it
//! - `PairingCoordinator` - One-shot pairing handshake
//! - `EventRouter` - Dispatch inbound events by kind
//! - Credential stores (memory, SQLite)

pub mod manager;
pub mod pairing;
pub mod router;
pub mod storage;

#[cfg(test)]
mod testing;

pub use manager::{SessionConfig, SessionError, SessionManager, SessionStatus};
pub use pairing::{PairingCoordinator, PairingError, PairingState};
pub use router::{EventHandler, EventRouter};
