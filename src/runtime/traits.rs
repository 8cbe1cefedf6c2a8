//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::backend::UserId;
use crate::db::Database;
use crate::render::Keyboard;
use crate::state_machine::{ConvState, MessageRef};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Session store error: {0}")]
pub struct StoreError(pub String);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport request failed: {0}")]
    Request(String),
    #[error("Transport refused call: {0}")]
    Refused(String),
}

/// Storage for per-session conversation state
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Raw stored value, `None` for a session never seen
    async fn load_state(&self, session_id: &str) -> Result<Option<String>, StoreError>;

    async fn save_state(&self, session_id: &str, state: &ConvState) -> Result<(), StoreError>;
}

/// Outbound messaging
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(
        &self,
        user: &UserId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, TransportError>;

    async fn send_photo(
        &self,
        user: &UserId,
        photo: Vec<u8>,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, TransportError>;

    async fn delete_message(&self, message: &MessageRef) -> Result<(), TransportError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn load_state(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        (**self).load_state(session_id).await
    }

    async fn save_state(&self, session_id: &str, state: &ConvState) -> Result<(), StoreError> {
        (**self).save_state(session_id, state).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send_text(
        &self,
        user: &UserId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, TransportError> {
        (**self).send_text(user, text, keyboard).await
    }

    async fn send_photo(
        &self,
        user: &UserId,
        photo: Vec<u8>,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, TransportError> {
        (**self).send_photo(user, photo, caption, keyboard).await
    }

    async fn delete_message(&self, message: &MessageRef) -> Result<(), TransportError> {
        (**self).delete_message(message).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as `SessionStore`
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for DatabaseStorage {
    async fn load_state(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        let record = self
            .db
            .get_session(session_id)
            .map_err(|e| StoreError(e.to_string()))?;
        Ok(record.map(|r| {
            tracing::debug!(updated_at = %r.updated_at, "Loaded session state");
            r.state
        }))
    }

    async fn save_state(&self, session_id: &str, state: &ConvState) -> Result<(), StoreError> {
        let raw = state.to_stored().map_err(|e| StoreError(e.to_string()))?;
        self.db
            .set_session_state(session_id, &raw)
            .map_err(|e| StoreError(e.to_string()))
    }
}
