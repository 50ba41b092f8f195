//! Remote doubles shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use tokio::sync::mpsc;
use wa_bridge_core::{InboundEvent, PairingEvent, PhoneStatus, ProtocolError, RemoteSession};

/// Remote whose `connect` never completes.
#[derive(Default)]
pub struct HangingConnect {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl HangingConnect {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSession for HangingConnect {
    fn is_connected(&self) -> bool {
        false
    }

    fn is_logged_in(&self) -> bool {
        false
    }

    async fn pairing_events(&self) -> Result<mpsc::Receiver<PairingEvent>, ProtocolError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn connect(&self) -> Result<(), ProtocolError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn event_stream(&self) -> BoxStream<'static, InboundEvent> {
        futures::stream::pending().boxed()
    }

    async fn is_on_whatsapp(&self, _phones: &[String]) -> Result<Vec<PhoneStatus>, ProtocolError> {
        Err(ProtocolError::NotConnected)
    }
}
