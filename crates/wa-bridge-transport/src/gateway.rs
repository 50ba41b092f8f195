//! HTTP gateway over the session manager.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use wa_bridge_core::{PhoneStatus, RemoteSession};
use wa_bridge_session::{SessionError, SessionManager, SessionStatus};

use crate::{
    protocol::{CheckNumbersRequest, ErrorBody},
    render::CodeRenderer,
};

/// Gateway error, converted into an HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid request")]
    InvalidRequest,
    #[error("{0}")]
    Pairing(SessionError),
    #[error("Failed to check WhatsApp numbers")]
    Query(SessionError),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::Pairing(e) | Self::Query(e) => {
                tracing::warn!(error = %e, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

/// Shared handler state.
pub struct GatewayState<R>
where
    R: RemoteSession,
{
    /// Session the gateway fronts.
    pub manager: Arc<SessionManager<R>>,
    /// Where issued pairing codes are shown.
    pub renderer: Arc<dyn CodeRenderer>,
}

impl<R> Clone for GatewayState<R>
where
    R: RemoteSession,
{
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            renderer: Arc::clone(&self.renderer),
        }
    }
}

/// Build the gateway router.
///
/// # Example
/// ```ignore
/// let app = create_router(Arc::clone(&manager), Arc::new(NoopRenderer));
/// axum::serve(listener, app).await?;
/// ```
pub fn create_router<R>(manager: Arc<SessionManager<R>>, renderer: Arc<dyn CodeRenderer>) -> Router
where
    R: RemoteSession,
{
    Router::new()
        .route("/qrcode", get(qrcode_handler::<R>))
        .route("/check-whatsapp", post(check_whatsapp_handler::<R>))
        .route("/status", get(status_handler::<R>))
        .layer(TraceLayer::new_for_http())
        .with_state(GatewayState { manager, renderer })
}

/// Issue a pairing code. Every call starts a new handshake, so a code
/// returned earlier stops being valid.
async fn qrcode_handler<R>(State(state): State<GatewayState<R>>) -> Result<String, GatewayError>
where
    R: RemoteSession,
{
    let code = state
        .manager
        .request_pairing_code()
        .await
        .map_err(GatewayError::Pairing)?;

    state.renderer.render(&code);
    Ok(code)
}

async fn check_whatsapp_handler<R>(
    State(state): State<GatewayState<R>>,
    body: Bytes,
) -> Result<Json<Vec<PhoneStatus>>, GatewayError>
where
    R: RemoteSession,
{
    let request = CheckNumbersRequest::from_slice(&body).map_err(|e| {
        tracing::debug!(error = %e, "Rejected check-whatsapp body");
        GatewayError::InvalidRequest
    })?;

    let result = state
        .manager
        .check_numbers(&request.phones)
        .await
        .map_err(GatewayError::Query)?;

    Ok(Json(result))
}

async fn status_handler<R>(State(state): State<GatewayState<R>>) -> Json<SessionStatus>
where
    R: RemoteSession,
{
    Json(state.manager.status())
}
