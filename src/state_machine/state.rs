//! Conversation state types

use crate::backend::{ProductId, UserId};
use crate::cart::AllowedQuantities;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Position of a session in the ordering flow
///
/// Persisted as tagged JSON, e.g. `{"state":"HANDLE_DESCRIPTION","product_id":42}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConvState {
    /// New session, or just restarted / checked out
    #[default]
    Start,

    /// Catalog keyboard is on screen
    HandleMenu,

    /// Product card with quantity keyboard is on screen
    HandleDescription { product_id: ProductId },

    /// Cart summary with remove buttons is on screen
    HandleCart,

    /// Email prompt sent, next text is the checkout email
    WaitingEmail,
}

/// A stored state value that is not one of the known states
#[derive(Debug, Error)]
#[error("Unrecognized session state {0:?}")]
pub struct UnknownState(pub String);

impl ConvState {
    pub fn label(&self) -> &'static str {
        match self {
            ConvState::Start => "START",
            ConvState::HandleMenu => "HANDLE_MENU",
            ConvState::HandleDescription { .. } => "HANDLE_DESCRIPTION",
            ConvState::HandleCart => "HANDLE_CART",
            ConvState::WaitingEmail => "WAITING_EMAIL",
        }
    }

    /// Value written to the session store
    pub fn to_stored(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a session store value
    pub fn from_stored(raw: &str) -> Result<Self, UnknownState> {
        serde_json::from_str(raw).map_err(|_| UnknownState(raw.to_string()))
    }
}

/// Per-turn context (immutable configuration)
#[derive(Debug, Clone)]
pub struct ConvContext {
    pub session_id: String,
    pub user_id: UserId,
    pub quantities: AllowedQuantities,
}

impl ConvContext {
    pub fn new(
        session_id: impl Into<String>,
        user_id: UserId,
        quantities: AllowedQuantities,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id,
            quantities,
        }
    }
}
