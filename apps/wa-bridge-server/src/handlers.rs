//! Inbound event handlers registered at startup.

use wa_bridge_core::{EventKind, InboundEvent};
use wa_bridge_session::{EventHandler, EventRouter};

/// Logs received messages.
pub struct MessageLogger;

impl EventHandler for MessageLogger {
    fn handle(&self, event: &InboundEvent) {
        if let InboundEvent::Message(msg) = event {
            tracing::info!(
                id = %msg.id,
                sender = %msg.sender,
                text = msg.conversation.as_deref().unwrap_or_default(),
                "Received a message"
            );
        }
    }
}

/// Logs connection lifecycle events.
pub struct SessionLogger;

impl EventHandler for SessionLogger {
    fn handle(&self, event: &InboundEvent) {
        match event {
            InboundEvent::Connected => tracing::info!("Session connected"),
            InboundEvent::Disconnected => tracing::info!("Session disconnected"),
            InboundEvent::PairSuccess { jid } => tracing::info!(%jid, "Device paired"),
            InboundEvent::LoggedOut { reason } => {
                tracing::warn!(%reason, "Device logged out; pair again via /qrcode");
            }
            _ => {}
        }
    }
}

/// Router with the gateway's handlers registered.
#[must_use]
pub fn event_router() -> EventRouter {
    EventRouter::new()
        .on(EventKind::Message, MessageLogger)
        .on(EventKind::Connected, SessionLogger)
        .on(EventKind::Disconnected, SessionLogger)
        .on(EventKind::PairSuccess, SessionLogger)
        .on(EventKind::LoggedOut, SessionLogger)
}
