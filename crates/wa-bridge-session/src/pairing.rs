//! One-shot pairing handshake.
//!
//! Turns the remote's pairing event channel into a single blocking
//! "give me the current code" call:
//!
//! ```text
//! Idle -> Connecting -> AwaitingCode -> Resolved
//!              \              \
//!               +-> Failed     +-> Failed
//! ```
//!
//! Only the first code of an attempt is surfaced; the channel is
//! dropped as soon as it arrives, so later rotations are not observed.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use wa_bridge_core::{PairingEvent, ProtocolError, RemoteSession};

/// Upper bound on tearing down an abandoned handshake.
pub(crate) const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// State of the current pairing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingState {
    /// No attempt has started.
    Idle,
    /// Subscribing and connecting.
    Connecting,
    /// Connected, waiting for the first code.
    AwaitingCode,
    /// A code was returned.
    Resolved,
    /// The attempt ended without a code.
    Failed,
}

/// Pairing error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PairingError {
    #[error("session active, please logout")]
    AlreadyLoggedIn,
    #[error("{0}")]
    Connect(ProtocolError),
    #[error("timed out waiting for a pairing code")]
    Timeout,
    #[error("QR code generation failed")]
    ChannelClosed,
    #[error("pairing cancelled by shutdown")]
    Cancelled,
}

/// Drives pairing attempts against a [`RemoteSession`].
///
/// Callers must not run two attempts concurrently; the session manager
/// holds its operation lock around [`PairingCoordinator::run`].
pub struct PairingCoordinator {
    timeout: Duration,
    state: watch::Sender<PairingState>,
}

impl PairingCoordinator {
    /// Create a coordinator that waits at most `timeout` for a code.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let (state, _) = watch::channel(PairingState::Idle);
        Self { timeout, state }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PairingState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PairingState> {
        self.state.subscribe()
    }

    /// Run one attempt to completion.
    ///
    /// The whole handshake, connecting included, is bounded by the
    /// timeout, and `shutdown` flipping to `true` fails it immediately.
    /// A timed out or cancelled attempt disconnects the remote.
    ///
    /// # Errors
    /// Returns `AlreadyLoggedIn` without touching the remote when the
    /// session is authenticated, `Connect` when subscribing or
    /// connecting fails, `Timeout` when no code arrives in time,
    /// `ChannelClosed` when the channel ends without a code and
    /// `Cancelled` on shutdown.
    pub async fn run<R>(
        &self,
        remote: &R,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<String, PairingError>
    where
        R: RemoteSession + ?Sized,
    {
        if remote.is_logged_in() {
            return Err(PairingError::AlreadyLoggedIn);
        }

        self.transition(PairingState::Connecting);

        let handshake = async {
            let mut events = remote
                .pairing_events()
                .await
                .map_err(PairingError::Connect)?;
            remote.connect().await.map_err(PairingError::Connect)?;

            self.transition(PairingState::AwaitingCode);
            first_code(&mut events)
                .await
                .ok_or(PairingError::ChannelClosed)
        };

        // The pairing channel lives inside `handshake` and is dropped with it.
        let outcome = tokio::select! {
            res = tokio::time::timeout(self.timeout, handshake) => {
                res.unwrap_or(Err(PairingError::Timeout))
            }
            () = cancelled(&mut shutdown) => Err(PairingError::Cancelled),
        };

        match outcome {
            Ok(code) => {
                self.transition(PairingState::Resolved);
                Ok(code)
            }
            Err(e @ (PairingError::Timeout | PairingError::Cancelled)) => {
                if tokio::time::timeout(TEARDOWN_TIMEOUT, remote.disconnect())
                    .await
                    .is_err()
                {
                    tracing::warn!("Remote did not disconnect in time");
                }
                Err(self.fail(e))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn transition(&self, next: PairingState) {
        let prev = self.state.send_replace(next);
        tracing::debug!(?prev, ?next, "Pairing state changed");
    }

    fn fail(&self, err: PairingError) -> PairingError {
        tracing::warn!(error = %err, "Pairing attempt failed");
        self.transition(PairingState::Failed);
        err
    }
}

async fn first_code(events: &mut mpsc::Receiver<PairingEvent>) -> Option<String> {
    while let Some(event) = events.recv().await {
        match event {
            PairingEvent::Code(code) => return Some(code),
            other => tracing::debug!(kind = other.kind(), "Skipping pairing event"),
        }
    }
    None
}

async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Sender gone: nobody can cancel any more.
            std::future::pending::<()>().await;
        }
    }
}
