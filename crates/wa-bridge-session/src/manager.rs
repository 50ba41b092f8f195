//! Session manager owning the single remote connection.

use std::{
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, mpsc, oneshot, watch},
    task::JoinHandle,
};
use wa_bridge_core::{
    CredentialStore, DeviceId, DeviceRecord, EventKind, InboundEvent, PhoneStatus, ProtocolError,
    RemoteSession, StoreError,
};

use crate::{
    pairing::{PairingCoordinator, PairingError, PairingState, TEARDOWN_TIMEOUT},
    router::{EventHandler, EventRouter},
};

/// How long shutdown waits for the event task to drain.
const ROUTER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("session active, please logout")]
    AlreadyLoggedIn,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("timed out waiting for a pairing code")]
    PairingTimeout,
    #[error("QR code generation failed")]
    PairingFailed,
    #[error("query failed: {0}")]
    Query(String),
    #[error("session is shutting down")]
    ShuttingDown,
}

impl From<PairingError> for SessionError {
    fn from(err: PairingError) -> Self {
        match err {
            PairingError::AlreadyLoggedIn => Self::AlreadyLoggedIn,
            PairingError::Connect(e) => Self::Connection(e.to_string()),
            PairingError::Timeout => Self::PairingTimeout,
            PairingError::ChannelClosed | PairingError::Cancelled => Self::PairingFailed,
        }
    }
}

/// Session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on waiting for a pairing code, in seconds.
    pub pairing_timeout_secs: u64,
    /// Connect at startup when the stored device is already paired.
    pub connect_on_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pairing_timeout_secs: 60,
            connect_on_start: true,
        }
    }
}

impl SessionConfig {
    /// Pairing timeout as a duration.
    #[must_use]
    pub const fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_secs)
    }
}

/// Snapshot of the session for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Stored device the session runs as.
    pub device_id: DeviceId,
    /// Address from the stored credentials, once paired.
    pub jid: Option<String>,
    /// Whether the socket is open.
    pub connected: bool,
    /// Whether the device is authenticated.
    pub logged_in: bool,
    /// State of the latest pairing attempt.
    pub pairing: PairingState,
}

/// Change to the stored device reported by the remote.
#[derive(Debug)]
enum DeviceUpdate {
    Paired(String),
    LoggedOut,
}

/// Forwards pairing outcomes from the event task to the device writer.
struct DeviceRecorder {
    updates: mpsc::UnboundedSender<DeviceUpdate>,
}

impl EventHandler for DeviceRecorder {
    fn handle(&self, event: &InboundEvent) {
        let update = match event {
            InboundEvent::PairSuccess { jid } => DeviceUpdate::Paired(jid.clone()),
            InboundEvent::LoggedOut { .. } => DeviceUpdate::LoggedOut,
            _ => return,
        };
        let _ = self.updates.send(update);
    }
}

/// Apply device updates to the shared record and the store, in order.
/// Ends once every `DeviceRecorder` is gone.
fn spawn_device_writer(
    store: Arc<dyn CredentialStore>,
    device: Arc<StdMutex<DeviceRecord>>,
    mut updates: mpsc::UnboundedReceiver<DeviceUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            let record = {
                let mut device = lock(&device);
                device.jid = match &update {
                    DeviceUpdate::Paired(jid) => Some(jid.clone()),
                    DeviceUpdate::LoggedOut => None,
                };
                device.clone()
            };

            let result = match update {
                DeviceUpdate::Paired(_) => store.save_device(&record).await,
                DeviceUpdate::LoggedOut => store.delete_device(record.id).await,
            };
            match result {
                Ok(()) => tracing::info!(
                    device_id = %record.id,
                    paired = record.is_paired(),
                    "Stored device credentials"
                ),
                Err(e) => tracing::error!(error = %e, "Failed to store device credentials"),
            }
        }
    })
}

/// Owns the remote session for the lifetime of the process.
///
/// Pairing and shutdown are serialized on one lock; number lookups
/// bypass it and fail fast when the session is not logged in.
pub struct SessionManager<R>
where
    R: RemoteSession,
{
    remote: Arc<R>,
    device: Arc<StdMutex<DeviceRecord>>,
    pairing: PairingCoordinator,
    /// Guards connect/disconnect; the flag records a completed shutdown.
    op_lock: Mutex<bool>,
    shutdown: watch::Sender<bool>,
    router_stop: StdMutex<Option<oneshot::Sender<()>>>,
    router_task: StdMutex<Option<JoinHandle<()>>>,
    device_writer: StdMutex<Option<JoinHandle<()>>>,
}

impl<R> SessionManager<R>
where
    R: RemoteSession,
{
    /// Load the device from `store`, build the remote and start routing
    /// its events through `router`.
    ///
    /// The router is live before this returns, so no event emitted after
    /// the remote exists is missed. Pairing and logout events are written
    /// back to `store`.
    ///
    /// # Errors
    /// Returns `Store` if no device record can be obtained.
    pub async fn initialize<F>(
        store: Arc<dyn CredentialStore>,
        build_remote: F,
        router: EventRouter,
        config: SessionConfig,
    ) -> Result<Self, SessionError>
    where
        F: FnOnce(DeviceRecord) -> R,
    {
        let device = store.first_device().await?;
        tracing::info!(
            device_id = %device.id,
            paired = device.is_paired(),
            "Loaded device credentials"
        );

        let remote = Arc::new(build_remote(device.clone()));
        let device = Arc::new(StdMutex::new(device));

        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let device_writer = spawn_device_writer(store, Arc::clone(&device), updates_rx);
        let router = router
            .on(
                EventKind::PairSuccess,
                DeviceRecorder {
                    updates: updates_tx.clone(),
                },
            )
            .on(
                EventKind::LoggedOut,
                DeviceRecorder {
                    updates: updates_tx,
                },
            );

        let (stop_tx, stop_rx) = oneshot::channel();
        tracing::debug!(handlers = router.handler_count(), "Starting event router");
        let router_task = router.spawn(remote.event_stream(), stop_rx);

        let (shutdown, _) = watch::channel(false);
        let manager = Self {
            remote,
            device,
            pairing: PairingCoordinator::new(config.pairing_timeout()),
            op_lock: Mutex::new(false),
            shutdown,
            router_stop: StdMutex::new(Some(stop_tx)),
            router_task: StdMutex::new(Some(router_task)),
            device_writer: StdMutex::new(Some(device_writer)),
        };

        if config.connect_on_start && manager.remote.is_logged_in() {
            if let Err(e) = manager.remote.connect().await {
                tracing::warn!(error = %e, "Failed to connect stored session");
            }
        }

        Ok(manager)
    }

    /// The remote session.
    #[must_use]
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Receiver observing pairing state transitions.
    #[must_use]
    pub fn pairing_state(&self) -> watch::Receiver<PairingState> {
        self.pairing.subscribe()
    }

    /// Current session status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let (device_id, jid) = {
            let device = lock(&self.device);
            (device.id, device.jid.clone())
        };
        SessionStatus {
            device_id,
            jid,
            connected: self.remote.is_connected(),
            logged_in: self.remote.is_logged_in(),
            pairing: self.pairing.state(),
        }
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Obtain a pairing code, connecting as part of the handshake.
    ///
    /// Concurrent callers queue behind the one in flight. Each request
    /// starts a new handshake, so it invalidates any code issued before.
    ///
    /// # Errors
    /// Returns `AlreadyLoggedIn`, `Connection`, `PairingTimeout`,
    /// `PairingFailed` or `ShuttingDown`.
    pub async fn request_pairing_code(&self) -> Result<String, SessionError> {
        if self.is_shutting_down() {
            return Err(SessionError::ShuttingDown);
        }

        let closed = self.op_lock.lock().await;
        if *closed || self.is_shutting_down() {
            return Err(SessionError::ShuttingDown);
        }

        if self.remote.is_logged_in() {
            return Err(SessionError::AlreadyLoggedIn);
        }

        // A previous attempt may have left an unauthenticated socket open.
        if self.remote.is_connected() {
            tracing::info!("Dropping previous pairing connection; its code is no longer valid");
            self.remote.disconnect().await;
        }

        let code = self
            .pairing
            .run(self.remote.as_ref(), self.shutdown.subscribe())
            .await?;
        drop(closed);

        tracing::info!("Pairing code issued");
        Ok(code)
    }

    /// Look up which `phones` are registered, preserving input order.
    ///
    /// # Errors
    /// Returns `Query` when the session is not logged in or the lookup
    /// fails, `ShuttingDown` after shutdown.
    pub async fn check_numbers(&self, phones: &[String]) -> Result<Vec<PhoneStatus>, SessionError> {
        if phones.is_empty() {
            return Ok(Vec::new());
        }
        if self.is_shutting_down() {
            return Err(SessionError::ShuttingDown);
        }
        if !self.remote.is_logged_in() {
            return Err(SessionError::Query(ProtocolError::NotLoggedIn.to_string()));
        }

        let result = self
            .remote
            .is_on_whatsapp(phones)
            .await
            .map_err(|e| SessionError::Query(e.to_string()))?;

        tracing::debug!(queried = phones.len(), returned = result.len(), "Checked numbers");
        Ok(result)
    }

    /// Disconnect, stop event routing and flush pending device updates.
    /// Safe to call repeatedly and while a pairing attempt is in flight.
    pub async fn shutdown(&self) {
        // Cancel first so an attempt holding the lock releases it.
        self.shutdown.send_replace(true);

        let mut closed = self.op_lock.lock().await;
        if *closed {
            tracing::debug!("Session already shut down");
            return;
        }

        tracing::info!("Disconnecting session");
        if tokio::time::timeout(TEARDOWN_TIMEOUT, self.remote.disconnect())
            .await
            .is_err()
        {
            tracing::warn!("Remote did not disconnect in time");
        }
        *closed = true;
        drop(closed);

        let stop = lock(&self.router_stop).take();
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
        let task = lock(&self.router_task).take();
        if let Some(task) = task {
            if tokio::time::timeout(ROUTER_DRAIN_TIMEOUT, task).await.is_err() {
                tracing::warn!("Event router did not stop in time");
            }
        }
        // The writer ends once the router, and with it every recorder, is gone.
        let writer = lock(&self.device_writer).take();
        if let Some(writer) = writer {
            if tokio::time::timeout(ROUTER_DRAIN_TIMEOUT, writer).await.is_err() {
                tracing::warn!("Device writer did not finish in time");
            }
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio_test::{assert_err, assert_ok};
    use wa_bridge_core::{EventKind, InboundEvent, LoopbackRemote, MessageEvent, PairingScript};

    use super::*;
    use crate::{storage::MemoryStore, testing::HangingConnect};

    fn script(codes: &[&str]) -> PairingScript {
        PairingScript::Codes {
            codes: codes.iter().map(ToString::to_string).collect(),
            interval: Duration::from_millis(5),
        }
    }

    async fn manager_with(
        store: &Arc<MemoryStore>,
        script: PairingScript,
        router: EventRouter,
        timeout_secs: u64,
    ) -> SessionManager<LoopbackRemote> {
        let config = SessionConfig {
            pairing_timeout_secs: timeout_secs,
            ..SessionConfig::default()
        };
        SessionManager::initialize(
            Arc::clone(store) as Arc<dyn CredentialStore>,
            |device| LoopbackRemote::new(device).with_script(script),
            router,
            config,
        )
        .await
        .unwrap()
    }

    async fn unpaired(script: PairingScript) -> SessionManager<LoopbackRemote> {
        manager_with(&Arc::new(MemoryStore::new()), script, EventRouter::new(), 5).await
    }

    async fn paired() -> SessionManager<LoopbackRemote> {
        let store = Arc::new(MemoryStore::new());
        store
            .save_device(&DeviceRecord::new().with_jid("1000000000@s.whatsapp.net"))
            .await
            .unwrap();
        manager_with(&store, script(&[]), EventRouter::new(), 5).await
    }

    #[tokio::test]
    async fn test_initialize_creates_device() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager_with(&store, script(&[]), EventRouter::new(), 5).await;

        let devices = store.devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(manager.status().device_id, devices[0].id);
        assert!(!manager.status().logged_in);
    }

    #[tokio::test]
    async fn test_paired_device_connects_on_start() {
        let manager = paired().await;
        let status = manager.status();
        assert!(status.connected);
        assert!(status.logged_in);
    }

    #[tokio::test]
    async fn test_pairing_returns_code() {
        let manager = unpaired(script(&["ABCD-1234"])).await;

        let code = manager.request_pairing_code().await.unwrap();

        assert_eq!(code, "ABCD-1234");
        assert_eq!(manager.status().pairing, PairingState::Resolved);
    }

    #[tokio::test]
    async fn test_pairing_without_code_fails() {
        let manager = unpaired(PairingScript::CloseWithoutCode).await;

        let err = manager.request_pairing_code().await.unwrap_err();

        assert!(matches!(err, SessionError::PairingFailed));
        assert_eq!(manager.status().pairing, PairingState::Failed);
    }

    #[tokio::test]
    async fn test_pairing_while_logged_in_never_connects() {
        let manager = paired().await;
        let before = manager.remote().connect_calls();

        for _ in 0..3 {
            let err = manager.request_pairing_code().await.unwrap_err();
            assert!(matches!(err, SessionError::AlreadyLoggedIn));
        }

        assert_eq!(manager.remote().connect_calls(), before);
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces() {
        let manager = unpaired(script(&["ABCD-1234"])).await;
        manager
            .remote()
            .set_connect_failure(Some("network unreachable".into()));

        let err = manager.request_pairing_code().await.unwrap_err();

        assert!(matches!(err, SessionError::Connection(msg) if msg.contains("network unreachable")));
    }

    #[tokio::test]
    async fn test_pairing_times_out() {
        let manager =
            manager_with(&Arc::new(MemoryStore::new()), PairingScript::Silent, EventRouter::new(), 1).await;

        let err = manager.request_pairing_code().await.unwrap_err();

        assert!(matches!(err, SessionError::PairingTimeout));
    }

    #[tokio::test]
    async fn test_concurrent_pairing_never_overlaps() {
        let manager = Arc::new(unpaired(script(&["ABCD-1234"])).await);

        let first = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.request_pairing_code().await }
        });
        let second = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.request_pairing_code().await }
        });

        // An overlapping connect would be refused with AlreadyConnected.
        assert_ok!(first.await.unwrap());
        assert_ok!(second.await.unwrap());

        // The second attempt queued, then replaced the first one's socket.
        assert_eq!(manager.remote().connect_calls(), 2);
        assert_eq!(manager.remote().disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_check_numbers_empty_input() {
        let manager = unpaired(script(&[])).await;
        let result = manager.check_numbers(&[]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_check_numbers_requires_login() {
        let manager = unpaired(script(&[])).await;
        let err = manager
            .check_numbers(&["+1000000001".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Query(_)));
    }

    #[tokio::test]
    async fn test_check_numbers_preserves_order() {
        let manager = paired().await;
        manager.remote().register_number("+1000000001");

        let phones = vec!["+1000000001".to_string(), "+1000000002".to_string()];
        let result = manager.check_numbers(&phones).await.unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].query, "+1000000001");
        assert!(result[0].is_in);
        assert_eq!(result[1].query, "+1000000002");
        assert!(!result[1].is_in);
    }

    #[tokio::test]
    async fn test_check_numbers_query_failure() {
        let manager = paired().await;
        manager
            .remote()
            .set_query_failure(Some("usync timeout".into()));

        let err = manager
            .check_numbers(&["+1000000001".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Query(msg) if msg.contains("usync timeout")));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let manager = paired().await;

        manager.shutdown().await;
        manager.shutdown().await;

        assert_eq!(manager.remote().disconnect_calls(), 1);
        assert!(!manager.status().connected);
        assert_err!(manager.request_pairing_code().await);
    }

    #[tokio::test]
    async fn test_shutdown_before_connect() {
        let manager = unpaired(script(&[])).await;
        manager.shutdown().await;
        assert_eq!(manager.remote().disconnect_calls(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_during_pairing_fails_attempt() {
        let manager = Arc::new(unpaired(PairingScript::Silent).await);
        let mut states = manager.pairing_state();

        let attempt = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.request_pairing_code().await }
        });

        states
            .wait_for(|s| *s == PairingState::AwaitingCode)
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), manager.shutdown())
            .await
            .expect("shutdown must not wait for the pairing timeout");

        let err = attempt.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::PairingFailed));
        assert_eq!(manager.status().pairing, PairingState::Failed);
        assert!(!manager.status().connected);
    }

    #[tokio::test]
    async fn test_events_reach_router() {
        let seen = Arc::new(AtomicUsize::new(0));
        let router = EventRouter::new().on(EventKind::Message, {
            let seen = Arc::clone(&seen);
            move |_: &InboundEvent| {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        let manager = manager_with(&Arc::new(MemoryStore::new()), script(&[]), router, 5).await;

        manager.remote().emit(InboundEvent::Message(MessageEvent {
            id: "3EB0C767D26A".into(),
            sender: "1000000001@s.whatsapp.net".into(),
            chat: "1000000001@s.whatsapp.net".into(),
            conversation: Some("hello".into()),
            timestamp: 1_700_000_000,
        }));
        manager.shutdown().await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stalled_connect_is_bounded() {
        let manager = SessionManager::initialize(
            Arc::new(MemoryStore::new()),
            |_| HangingConnect::default(),
            EventRouter::new(),
            SessionConfig {
                pairing_timeout_secs: 1,
                ..SessionConfig::default()
            },
        )
        .await
        .unwrap();

        let err = tokio::time::timeout(Duration::from_secs(3), manager.request_pairing_code())
            .await
            .expect("pairing must give up after its timeout")
            .unwrap_err();

        assert!(matches!(err, SessionError::PairingTimeout));
        assert_eq!(manager.status().pairing, PairingState::Failed);
        assert_eq!(manager.remote().disconnects(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_while_connecting() {
        let manager = Arc::new(
            SessionManager::initialize(
                Arc::new(MemoryStore::new()),
                |_| HangingConnect::default(),
                EventRouter::new(),
                SessionConfig::default(),
            )
            .await
            .unwrap(),
        );
        let mut states = manager.pairing_state();

        let attempt = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.request_pairing_code().await }
        });
        states
            .wait_for(|s| *s == PairingState::Connecting)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(3), manager.shutdown())
            .await
            .expect("shutdown must not wait on a stalled connect");

        let err = attempt.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::PairingFailed));
        assert_eq!(manager.status().pairing, PairingState::Failed);
        assert_eq!(manager.remote().connects(), 1);
    }

    #[tokio::test]
    async fn test_pairing_survives_restart() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager_with(&store, script(&["ABCD-1234"]), EventRouter::new(), 5).await;

        assert_ok!(manager.request_pairing_code().await);
        manager.remote().complete_pairing("1000000001@s.whatsapp.net");
        manager.shutdown().await;

        assert_eq!(
            manager.status().jid.as_deref(),
            Some("1000000001@s.whatsapp.net")
        );
        let stored = store.devices().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].jid.as_deref(), Some("1000000001@s.whatsapp.net"));

        let restarted = manager_with(&store, script(&[]), EventRouter::new(), 5).await;
        let status = restarted.status();
        assert_eq!(status.device_id, manager.status().device_id);
        assert!(status.logged_in);
        assert!(status.connected);
    }

    #[tokio::test]
    async fn test_logout_forgets_device() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_device(&DeviceRecord::new().with_jid("1000000000@s.whatsapp.net"))
            .await
            .unwrap();
        let manager = manager_with(&store, script(&[]), EventRouter::new(), 5).await;

        manager.remote().log_out("device removed from phone");
        manager.shutdown().await;

        assert!(manager.status().jid.is_none());
        assert!(!manager.status().logged_in);
        assert!(store.devices().await.unwrap().is_empty());
    }
}
