//! wa-bridge: HTTP gateway for a single remote messaging session.
//!
//! Run with: cargo run -p wa-bridge-server -- --memory-store
//!
//! Then request a pairing code with `curl http://localhost:8888/qrcode`.

mod config;
mod handlers;
mod shutdown;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wa_bridge_core::{CredentialStore, LoopbackRemote};
use wa_bridge_session::{
    SessionManager,
    storage::{MemoryStore, SqliteStore},
};
use wa_bridge_transport::{CodeRenderer, NoopRenderer, TerminalRenderer, create_router};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .init();

    let store: Arc<dyn CredentialStore> = if config.memory_store {
        tracing::warn!("Using in-memory credential store; pairing will not survive a restart");
        Arc::new(MemoryStore::new())
    } else {
        let store = SqliteStore::open(&config.database)
            .await
            .with_context(|| format!("failed to open {}", config.database.display()))?;
        Arc::new(store)
    };

    tracing::warn!(
        "Running on the in-process loopback remote: pairing codes cannot be scanned \
         and only locally registered numbers are reported"
    );
    let manager = SessionManager::initialize(
        Arc::clone(&store),
        LoopbackRemote::new,
        handlers::event_router(),
        config.session(),
    )
    .await
    .context("failed to initialize session")?;
    let manager = Arc::new(manager);

    let renderer: Arc<dyn CodeRenderer> = if config.no_qr {
        Arc::new(NoopRenderer)
    } else {
        Arc::new(TerminalRenderer)
    };

    let app = create_router(Arc::clone(&manager), renderer);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!("Server listening on http://{}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_on(
            shutdown::wait_for_shutdown_signal(),
            Arc::clone(&manager),
        ))
        .await
        .context("server error")?;

    store.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
