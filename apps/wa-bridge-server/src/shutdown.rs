//! Signal-driven shutdown.

use std::{future::Future, sync::Arc};

use wa_bridge_core::RemoteSession;
use wa_bridge_session::SessionManager;

/// Wait for a shutdown signal (SIGTERM or SIGINT).
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                    _ = sigint.recv() => tracing::info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Failed to register signal handlers, falling back to ctrl-c: {e}");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received ctrl-c");
}

/// Wait for `signal`, then shut the session down.
///
/// The session is only ever touched through `SessionManager::shutdown`,
/// which serializes with in-flight pairing.
pub async fn shutdown_on<R, F>(signal: F, manager: Arc<SessionManager<R>>)
where
    R: RemoteSession,
    F: Future<Output = ()>,
{
    signal.await;
    tracing::info!("Received shutdown signal");
    manager.shutdown().await;
}
