//! HTTP API for the grocery bot
//!
//! Generic inbound events and the Telegram webhook both end up as one
//! conversation turn.

mod handlers;
mod telegram;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::backend::CatalogBackend;
use crate::runtime::{ConversationRuntime, SessionStore, Transport, TurnError};
use crate::state_machine::{ConvState, InboundEvent};
use async_trait::async_trait;
use std::sync::Arc;

/// Anything that can run a conversation turn
#[async_trait]
pub trait TurnRunner: Send + Sync {
    async fn advance(&self, inbound: InboundEvent) -> Result<ConvState, TurnError>;
}

#[async_trait]
impl<S, B, T> TurnRunner for ConversationRuntime<S, B, T>
where
    S: SessionStore + 'static,
    B: CatalogBackend + 'static,
    T: Transport + 'static,
{
    async fn advance(&self, inbound: InboundEvent) -> Result<ConvState, TurnError> {
        ConversationRuntime::advance(self, inbound).await
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<dyn TurnRunner>,
}

impl AppState {
    pub fn new(runtime: Arc<dyn TurnRunner>) -> Self {
        Self { runtime }
    }
}
