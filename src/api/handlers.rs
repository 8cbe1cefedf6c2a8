//! HTTP request handlers

use super::telegram::Update;
use super::types::{ErrorResponse, HealthResponse, WebhookAck};
use super::AppState;
use crate::cart::CartError;
use crate::runtime::TurnError;
use crate::state_machine::{ConvState, InboundEvent};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/events", post(post_event))
        .route("/telegram/webhook", post(telegram_webhook))
        .route("/health", get(health))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Turns
// ============================================================

/// Run one turn for a transport-neutral event and report the resulting state
async fn post_event(
    State(state): State<AppState>,
    Json(inbound): Json<InboundEvent>,
) -> Result<Json<ConvState>, AppError> {
    let next = state.runtime.advance(inbound).await?;
    Ok(Json(next))
}

/// Telegram redelivers on non-2xx, which would replay cart mutations, so
/// every update is acknowledged.
async fn telegram_webhook(
    State(state): State<AppState>,
    Json(update): Json<Update>,
) -> Json<WebhookAck> {
    let update_id = update.update_id;
    match update.into_inbound() {
        Some(inbound) => {
            if let Err(e) = state.runtime.advance(inbound).await {
                tracing::warn!(update_id, error = %e, "Telegram update failed");
            }
        }
        None => tracing::debug!(update_id, "Ignoring update without a conversation event"),
    }
    Json(WebhookAck { ok: true })
}

// ============================================================
// Service info
// ============================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn get_version() -> &'static str {
    concat!("grocery-bot ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Conflict(String),
    BadGateway(String),
    Internal(String),
}

impl From<TurnError> for AppError {
    fn from(err: TurnError) -> Self {
        let message = err.to_string();
        match err {
            TurnError::Transition(_) | TurnError::Cart(CartError::QuantityNotAllowed(_)) => {
                AppError::BadRequest(message)
            }
            TurnError::Checkout(_) => AppError::Conflict(message),
            TurnError::Backend(_) | TurnError::Cart(_) | TurnError::Transport(_) => {
                AppError::BadGateway(message)
            }
            TurnError::Configuration(_) | TurnError::Store(_) => AppError::Internal(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
