//! In-process remote session (feature `loopback`).
//!
//! Behaves like the real service closely enough to run the gateway
//! without network access: it issues pairing codes after `connect`,
//! answers number lookups from a local registry and lets the caller
//! inject inbound events.

use std::{
    collections::HashSet,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use futures::{StreamExt, stream::BoxStream};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::{
    device::DeviceRecord,
    events::{InboundEvent, PairingEvent},
    traits::{PhoneStatus, ProtocolError, RemoteSession},
};

const JID_SERVER: &str = "s.whatsapp.net";

/// How the loopback answers a pairing handshake.
#[derive(Debug, Clone)]
pub enum PairingScript {
    /// Emit each code `interval` apart, then a timeout event, then close.
    Codes {
        codes: Vec<String>,
        interval: Duration,
    },
    /// Close the channel without emitting a code.
    CloseWithoutCode,
    /// Keep the channel open and never emit.
    Silent,
}

#[derive(Default)]
struct LoopbackState {
    connected: bool,
    logged_in: bool,
    pending: Option<mpsc::Sender<PairingEvent>>,
    emitter: Option<JoinHandle<()>>,
    connect_failure: Option<String>,
    query_failure: Option<String>,
}

/// Loopback implementation of [`RemoteSession`].
pub struct LoopbackRemote {
    script: PairingScript,
    state: Mutex<LoopbackState>,
    registered: Mutex<HashSet<String>>,
    events: broadcast::Sender<InboundEvent>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl LoopbackRemote {
    /// Create a loopback for `device`. A paired device starts logged in.
    #[must_use]
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(device: DeviceRecord) -> Self {
        let script = PairingScript::Codes {
            codes: (0..3).map(|_| pairing_code(&device)).collect(),
            interval: Duration::from_secs(20),
        };
        let (events, _) = broadcast::channel(1024);
        let state = LoopbackState {
            logged_in: device.is_paired(),
            ..LoopbackState::default()
        };

        Self {
            script,
            state: Mutex::new(state),
            registered: Mutex::new(HashSet::new()),
            events,
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    /// Replace the pairing behavior.
    #[must_use]
    pub fn with_script(mut self, script: PairingScript) -> Self {
        self.script = script;
        self
    }

    /// Mark `phone` as registered with the service.
    pub fn register_number(&self, phone: &str) {
        lock(&self.registered).insert(digits(phone));
    }

    /// Make the next `connect` calls fail with `reason` (`None` clears it).
    pub fn set_connect_failure(&self, reason: Option<String>) {
        self.state().connect_failure = reason;
    }

    /// Make number lookups fail with `reason` (`None` clears it).
    pub fn set_query_failure(&self, reason: Option<String>) {
        self.state().query_failure = reason;
    }

    /// Simulate the user accepting the device on their phone.
    pub fn complete_pairing(&self, jid: impl Into<String>) {
        let jid = jid.into();
        self.state().logged_in = true;
        self.emit(InboundEvent::PairSuccess { jid });
    }

    /// Simulate the device being unlinked from the phone.
    pub fn log_out(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut state = self.state();
            state.logged_in = false;
            state.connected = false;
            state.pending = None;
            if let Some(emitter) = state.emitter.take() {
                emitter.abort();
            }
        }
        self.emit(InboundEvent::LoggedOut { reason });
    }

    /// Push an inbound event to every subscriber.
    pub fn emit(&self, event: InboundEvent) {
        let _ = self.events.send(event);
    }

    /// Number of `connect` calls so far, failed ones included.
    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls that closed an open connection.
    #[must_use]
    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        lock(&self.state)
    }

    fn spawn_emitter(&self, tx: mpsc::Sender<PairingEvent>) -> Option<JoinHandle<()>> {
        match self.script.clone() {
            PairingScript::Codes { codes, interval } => Some(tokio::spawn(async move {
                for code in codes {
                    tracing::debug!(%code, "Loopback issuing pairing code");
                    if tx.send(PairingEvent::Code(code)).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(interval).await;
                }
                let _ = tx.send(PairingEvent::Timeout).await;
            })),
            PairingScript::CloseWithoutCode => None,
            PairingScript::Silent => Some(tokio::spawn(async move {
                tx.closed().await;
            })),
        }
    }
}

#[async_trait]
impl RemoteSession for LoopbackRemote {
    fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn is_logged_in(&self) -> bool {
        self.state().logged_in
    }

    async fn pairing_events(&self) -> Result<mpsc::Receiver<PairingEvent>, ProtocolError> {
        let mut state = self.state();
        if state.logged_in {
            return Err(ProtocolError::Connect("device is already paired".into()));
        }
        if state.connected {
            return Err(ProtocolError::AlreadyConnected);
        }

        let (tx, rx) = mpsc::channel(8);
        state.pending = Some(tx);
        Ok(rx)
    }

    async fn connect(&self) -> Result<(), ProtocolError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state();
        if let Some(reason) = state.connect_failure.clone() {
            state.pending = None;
            return Err(ProtocolError::Connect(reason));
        }
        if state.connected {
            return Err(ProtocolError::AlreadyConnected);
        }
        state.connected = true;

        if let Some(tx) = state.pending.take() {
            state.emitter = self.spawn_emitter(tx);
        }
        let logged_in = state.logged_in;
        drop(state);

        if logged_in {
            self.emit(InboundEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state();
        state.pending = None;
        if let Some(emitter) = state.emitter.take() {
            emitter.abort();
        }
        if !state.connected {
            return;
        }
        state.connected = false;
        drop(state);

        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.emit(InboundEvent::Disconnected);
    }

    fn event_stream(&self) -> BoxStream<'static, InboundEvent> {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(|res| async move { res.ok() })
            .boxed()
    }

    async fn is_on_whatsapp(&self, phones: &[String]) -> Result<Vec<PhoneStatus>, ProtocolError> {
        {
            let state = self.state();
            if !state.connected {
                return Err(ProtocolError::NotConnected);
            }
            if !state.logged_in {
                return Err(ProtocolError::NotLoggedIn);
            }
            if let Some(reason) = state.query_failure.clone() {
                return Err(ProtocolError::Query(reason));
            }
        }

        let registered = lock(&self.registered);
        Ok(phones
            .iter()
            .map(|phone| {
                let number = digits(phone);
                let is_in = registered.contains(&number);
                PhoneStatus {
                    query: phone.clone(),
                    jid: if is_in {
                        format!("{number}@{JID_SERVER}")
                    } else {
                        String::new()
                    },
                    is_in,
                    verified_name: None,
                }
            })
            .collect())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn digits(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

/// Build a pairing code in the service's `ref,noise,identity,secret` layout.
fn pairing_code(device: &DeviceRecord) -> String {
    let reference = Uuid::new_v4().simple().to_string();
    let noise = BASE64.encode(Uuid::new_v4().as_bytes());
    let identity = BASE64.encode(&device.identity_key);
    let secret = BASE64.encode(Uuid::new_v4().as_bytes());
    format!("2@{reference},{noise},{identity},{secret}")
}
