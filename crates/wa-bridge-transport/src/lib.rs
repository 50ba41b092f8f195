//! HTTP gateway and pairing code rendering.
//!
//! Provides:
//! - Request/response bodies (JSON)
//! - Axum router over `SessionManager` (feature: http)
//! - Terminal QR rendering of pairing codes (feature: terminal)

pub mod protocol;
pub mod render;

#[cfg(feature = "http")]
pub mod gateway;

#[cfg(feature = "http")]
pub use gateway::{GatewayError, GatewayState, create_router};
pub use protocol::{CheckNumbersRequest, ErrorBody};
pub use render::{CodeRenderer, NoopRenderer};
#[cfg(feature = "terminal")]
pub use render::TerminalRenderer;
