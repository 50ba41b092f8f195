//! Command-line and environment configuration.

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use wa_bridge_session::SessionConfig;

/// HTTP gateway for a single remote messaging session.
#[derive(Debug, Clone, Parser)]
#[command(name = "wa-bridge", version, about)]
pub struct Config {
    /// Address the HTTP gateway listens on
    #[arg(long, env = "WA_BRIDGE_LISTEN", default_value = "0.0.0.0:8888")]
    pub listen: SocketAddr,

    /// SQLite database holding device credentials
    #[arg(long, env = "WA_BRIDGE_DATABASE", default_value = "examplestore.db")]
    pub database: PathBuf,

    /// Keep credentials in memory only (pairing is lost on restart)
    #[arg(long, env = "WA_BRIDGE_MEMORY_STORE")]
    pub memory_store: bool,

    /// Seconds to wait for a pairing code before giving up
    #[arg(long, env = "WA_BRIDGE_PAIRING_TIMEOUT", default_value_t = 60)]
    pub pairing_timeout: u64,

    /// Do not print pairing codes as QR codes on stdout
    #[arg(long, env = "WA_BRIDGE_NO_QR")]
    pub no_qr: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "WA_BRIDGE_LOG", default_value = "info")]
    pub log_filter: String,
}

impl Config {
    /// Session settings derived from the command line.
    #[must_use]
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            pairing_timeout_secs: self.pairing_timeout,
            ..SessionConfig::default()
        }
    }
}
