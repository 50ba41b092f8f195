//! Events pushed by the remote service.

use serde::{Deserialize, Serialize};

/// Progress of a pairing handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "value", rename_all = "kebab-case")]
pub enum PairingEvent {
    /// A code the user can scan or type.
    Code(String),
    /// The device was accepted.
    Success,
    /// The service stopped issuing codes.
    Timeout,
    /// The handshake failed.
    Error(String),
    /// The service refuses this client version.
    ClientOutdated,
    /// An event this build does not know about.
    Other(String),
}

impl PairingEvent {
    /// Name of the event as the service reports it.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Code(_) => "code",
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::Error(_) => "error",
            Self::ClientOutdated => "client-outdated",
            Self::Other(kind) => kind,
        }
    }

    /// The pairing code, if this is a code event.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        if let Self::Code(code) = self {
            Some(code)
        } else {
            None
        }
    }
}

/// A received chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Message identifier.
    pub id: String,
    /// Sender address.
    pub sender: String,
    /// Chat the message belongs to.
    pub chat: String,
    /// Plain-text body, when the message has one.
    pub conversation: Option<String>,
    /// Server timestamp (Unix epoch seconds).
    pub timestamp: i64,
}

/// Delivery or read receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptEvent {
    /// Messages the receipt covers.
    pub message_ids: Vec<String>,
    /// Chat the messages belong to.
    pub chat: String,
    /// Receipt type (`delivered`, `read`, ...).
    pub receipt_type: String,
}

/// Inbound notification from the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A message arrived.
    Message(MessageEvent),
    /// A receipt arrived.
    Receipt(ReceiptEvent),
    /// The connection is up and authenticated.
    Connected,
    /// The connection dropped.
    Disconnected,
    /// Pairing finished and the device got an address.
    PairSuccess { jid: String },
    /// The service revoked this device.
    LoggedOut { reason: String },
    /// Anything else.
    Other { kind: String },
}

/// Dispatch key for inbound events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Receipt,
    Connected,
    Disconnected,
    PairSuccess,
    LoggedOut,
    Other(String),
}

impl InboundEvent {
    /// Kind used to pick a handler.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message(_) => EventKind::Message,
            Self::Receipt(_) => EventKind::Receipt,
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::PairSuccess { .. } => EventKind::PairSuccess,
            Self::LoggedOut { .. } => EventKind::LoggedOut,
            Self::Other { kind } => EventKind::Other(kind.clone()),
        }
    }
}
