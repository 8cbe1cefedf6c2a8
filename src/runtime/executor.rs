//! Turn executor
//!
//! Loads a session's state, runs the pure transition, executes the effects
//! and persists the next state. Nothing is persisted unless every effect
//! succeeded.

use super::traits::{SessionStore, StoreError, Transport, TransportError};
use crate::backend::{BackendError, CatalogBackend, UserId};
use crate::cart::{AllowedQuantities, CartAggregator, CartError};
use crate::checkout::{CheckoutError, EmailCapture};
use crate::locks::KeyedLocks;
use crate::render::{self, texts};
use crate::state_machine::{
    transition, ConvContext, ConvState, Effect, Event, InboundEvent, TransitionError, UnknownState,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;

/// Why a turn was abandoned. The stored state is unchanged in every case.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] UnknownState),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Cart(CartError),
    #[error(transparent)]
    Checkout(CheckoutError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CartError> for TurnError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::Backend(e) => TurnError::Backend(e),
            other => TurnError::Cart(other),
        }
    }
}

impl From<CheckoutError> for TurnError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::Backend(e) => TurnError::Backend(e),
            other => TurnError::Checkout(other),
        }
    }
}

impl TurnError {
    /// Errors that indicate a bug or drift rather than user input
    pub fn needs_operator(&self) -> bool {
        matches!(self, TurnError::Configuration(_) | TurnError::Store(_))
    }
}

/// Generic conversation runtime that works with any store, backend and transport
pub struct ConversationRuntime<S, B, T>
where
    S: SessionStore,
    B: CatalogBackend,
    T: Transport,
{
    store: S,
    backend: Arc<B>,
    carts: CartAggregator<B>,
    checkout: EmailCapture<B>,
    transport: T,
    session_locks: KeyedLocks<String>,
}

impl<S, B, T> ConversationRuntime<S, B, T>
where
    S: SessionStore,
    B: CatalogBackend,
    T: Transport,
{
    pub fn new(store: S, backend: Arc<B>, transport: T, quantities: AllowedQuantities) -> Self {
        Self {
            store,
            carts: CartAggregator::new(Arc::clone(&backend), quantities),
            checkout: EmailCapture::new(Arc::clone(&backend)),
            backend,
            transport,
            session_locks: KeyedLocks::new(),
        }
    }

    #[allow(dead_code)] // Used in tests
    pub fn carts(&self) -> &CartAggregator<B> {
        &self.carts
    }

    /// Process one inbound event to completion and return the persisted state.
    ///
    /// Turns of one session run one at a time; other sessions are not blocked.
    pub async fn advance(&self, inbound: InboundEvent) -> Result<ConvState, TurnError> {
        let span = tracing::info_span!(
            "turn",
            turn_id = %uuid::Uuid::new_v4(),
            session_id = %inbound.session_id,
            user_id = %inbound.user_id,
        );
        async {
            let result = self.advance_locked(inbound).await;
            if let Err(e) = &result {
                if e.needs_operator() {
                    tracing::error!(error = %e, alert = true, "Turn aborted, session needs attention");
                } else {
                    tracing::warn!(error = %e, "Turn aborted, state unchanged");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn advance_locked(&self, inbound: InboundEvent) -> Result<ConvState, TurnError> {
        let _guard = self.session_locks.lock(&inbound.session_id).await;
        let context = ConvContext::new(
            inbound.session_id.clone(),
            inbound.user_id.clone(),
            self.carts.quantities().clone(),
        );
        let event = Event::from_inbound(&inbound);
        let state = self.current_state(&context.session_id, &event).await?;
        let from = state.label();

        let state = self.run(state, &context, event).await?;

        self.store.save_state(&context.session_id, &state).await?;
        tracing::info!(from, to = state.label(), "Turn completed");
        Ok(state)
    }

    /// State the turn starts from
    async fn current_state(&self, session_id: &str, event: &Event) -> Result<ConvState, TurnError> {
        if event.is_restart() {
            return Ok(ConvState::Start);
        }
        match self.store.load_state(session_id).await? {
            Some(raw) => Ok(ConvState::from_stored(&raw)?),
            None => {
                tracing::debug!("No stored state, starting new session");
                Ok(ConvState::Start)
            }
        }
    }

    /// Apply the event and every event generated by its effects.
    ///
    /// Once a cart mutation has gone through the turn is committed: later
    /// failures skip the remaining effects and the new state is persisted.
    async fn run(
        &self,
        mut state: ConvState,
        context: &ConvContext,
        event: Event,
    ) -> Result<ConvState, TurnError> {
        let mut events_to_process = vec![event];
        let mut committed = false;

        while let Some(current_event) = events_to_process.pop() {
            let result = transition(&state, context, current_event)?;
            state = result.new_state;

            for effect in result.effects {
                let mutates_cart = effect.mutates_cart();
                match self.execute_effect(effect, context).await {
                    Ok(generated) => {
                        committed |= mutates_cart;
                        events_to_process.extend(generated);
                    }
                    Err(e) if committed => {
                        tracing::warn!(error = %e, "Effect failed after cart change, keeping turn");
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(state)
    }

    /// Execute an effect and optionally return a generated event
    async fn execute_effect(
        &self,
        effect: Effect,
        context: &ConvContext,
    ) -> Result<Option<Event>, TurnError> {
        let user = &context.user_id;
        match effect {
            Effect::SendText { text } => {
                self.transport.send_text(user, &text, None).await?;
                Ok(None)
            }

            Effect::ShowCatalog => {
                let products = self.backend.list_products().await?;
                let keyboard = render::catalog_keyboard(&products);
                self.transport
                    .send_text(user, texts::MENU_PROMPT, Some(&keyboard))
                    .await?;
                Ok(None)
            }

            Effect::ShowProduct { product_id } => {
                let product = self.backend.get_product(product_id).await?;
                let caption = render::product_caption(&product);
                let keyboard = render::product_keyboard(self.carts.quantities());
                match &product.picture {
                    Some(picture) => {
                        let bytes = self.backend.fetch_picture(picture).await?;
                        self.transport
                            .send_photo(user, bytes, &caption, Some(&keyboard))
                            .await?;
                    }
                    None => {
                        self.transport
                            .send_text(user, &caption, Some(&keyboard))
                            .await?;
                    }
                }
                Ok(None)
            }

            Effect::ShowCart => {
                self.show_cart(user).await?;
                Ok(None)
            }

            Effect::AddToCart { product_id, amount } => {
                self.carts.add_to_cart(user, product_id, amount).await?;
                Ok(None)
            }

            Effect::RemoveFromCart { product_id } => {
                self.carts.remove_from_cart(user, product_id).await?;
                Ok(None)
            }

            Effect::PromptEmail => {
                self.transport
                    .send_text(user, texts::EMAIL_PROMPT, None)
                    .await?;
                Ok(None)
            }

            Effect::SubmitEmail { email } => {
                match self.checkout.submit_email_for(user, &email).await {
                    Ok(()) => Ok(Some(Event::EmailAccepted)),
                    Err(e) if e.is_validation_failure() => {
                        tracing::info!(error = %e, "Checkout email rejected");
                        Ok(Some(Event::EmailRejected))
                    }
                    Err(e) => Err(e.into()),
                }
            }

            Effect::DeleteMessage { message } => {
                // The message may already be gone; that must not cost the turn
                if let Err(e) = self.transport.delete_message(&message).await {
                    tracing::warn!(error = %e, message_id = message.message_id, "Failed to delete message");
                }
                Ok(None)
            }
        }
    }

    async fn show_cart(&self, user: &UserId) -> Result<(), TurnError> {
        let summary = self.carts.summary_for(user).await?;
        let text = render::cart_text(&summary);
        let keyboard = render::cart_keyboard(&summary);
        self.transport.send_text(user, &text, Some(&keyboard)).await?;
        Ok(())
    }
}
