//! Pure state transition function
//!
//! Given the same state, context and event this always produces the same
//! next state and effects; all I/O happens in the runtime.

use super::event::{ControlToken, Token};
#[cfg(test)]
use super::event::MessageRef;
use super::{ConvContext, ConvState, Effect, Event};
use crate::backend::ProductId;
use crate::render::texts;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug, PartialEq, Eq)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Quantity {0} is not offered")]
    QuantityNotAllowed(u64),
    #[error("Unexpected button payload {0:?}")]
    UnexpectedToken(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
pub fn transition(
    state: &ConvState,
    context: &ConvContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Start: restart overrides whatever was stored
        // ============================================================
        (_, Event::Restart)
        | (ConvState::Start, Event::Text { .. } | Event::Button { .. }) => {
            Ok(TransitionResult::new(ConvState::HandleMenu)
                .with_effect(Effect::send_text(texts::GREETING))
                .with_effect(Effect::ShowCatalog))
        }

        // ============================================================
        // Control tokens, shared by every catalog-derived keyboard
        // ============================================================
        (
            ConvState::HandleMenu | ConvState::HandleDescription { .. } | ConvState::HandleCart,
            Event::Button {
                token: Token::Control(control),
                ..
            },
        ) => Ok(control_transition(control)),

        // ============================================================
        // Catalog
        // ============================================================
        (
            ConvState::HandleMenu,
            Event::Button {
                token: Token::Numeric(id),
                message,
            },
        ) => {
            let product_id = ProductId(id);
            Ok(
                TransitionResult::new(ConvState::HandleDescription { product_id })
                    .with_effect(Effect::ShowProduct { product_id })
                    .with_effects(Effect::delete(message)),
            )
        }

        // ============================================================
        // Product card: quantity buttons
        // ============================================================
        (
            ConvState::HandleDescription { product_id },
            Event::Button {
                token: Token::Numeric(amount),
                ..
            },
        ) => {
            let amount = u32::try_from(amount)
                .ok()
                .filter(|a| context.quantities.contains(*a))
                .ok_or(TransitionError::QuantityNotAllowed(amount))?;
            Ok(TransitionResult::new(ConvState::HandleMenu)
                .with_effect(Effect::AddToCart {
                    product_id: *product_id,
                    amount,
                })
                .with_effect(Effect::ShowCatalog))
        }

        // ============================================================
        // Cart: remove buttons
        // ============================================================
        (
            ConvState::HandleCart,
            Event::Button {
                token: Token::Numeric(id),
                message,
            },
        ) => Ok(TransitionResult::new(ConvState::HandleCart)
            .with_effect(Effect::RemoveFromCart {
                product_id: ProductId(id),
            })
            .with_effect(Effect::ShowCart)
            .with_effects(Effect::delete(message))),

        (
            ConvState::HandleMenu | ConvState::HandleDescription { .. } | ConvState::HandleCart,
            Event::Button {
                token: Token::Other(payload),
                ..
            },
        ) => Err(TransitionError::UnexpectedToken(payload)),

        // Free text is ignored while a keyboard is on screen
        (
            ConvState::HandleMenu | ConvState::HandleDescription { .. } | ConvState::HandleCart,
            Event::Text { .. },
        ) => Ok(TransitionResult::new(state.clone())),

        // ============================================================
        // Checkout
        // ============================================================
        (ConvState::WaitingEmail, Event::Text { text }) => Ok(TransitionResult::new(
            ConvState::WaitingEmail,
        )
        .with_effect(Effect::SubmitEmail {
            email: text.trim().to_string(),
        })),

        (ConvState::WaitingEmail, Event::EmailAccepted) => Ok(TransitionResult::new(
            ConvState::Start,
        )
        .with_effect(Effect::send_text(texts::EMAIL_SAVED))),

        (ConvState::WaitingEmail, Event::EmailRejected) => Ok(TransitionResult::new(
            ConvState::WaitingEmail,
        )
        .with_effect(Effect::send_text(texts::EMAIL_INVALID))),

        // Stale keyboards are ignored while waiting for the email
        (ConvState::WaitingEmail, Event::Button { .. }) => {
            Ok(TransitionResult::new(ConvState::WaitingEmail))
        }

        // ============================================================
        // Checkout outcomes outside checkout
        // ============================================================
        (
            ConvState::Start
            | ConvState::HandleMenu
            | ConvState::HandleDescription { .. }
            | ConvState::HandleCart,
            event @ (Event::EmailAccepted | Event::EmailRejected),
        ) => Err(TransitionError::InvalidTransition(format!(
            "{event:?} in {}",
            state.label()
        ))),
    }
}

fn control_transition(control: ControlToken) -> TransitionResult {
    match control {
        ControlToken::BackToMenu => {
            TransitionResult::new(ConvState::HandleMenu).with_effect(Effect::ShowCatalog)
        }
        ControlToken::ShowCart => {
            TransitionResult::new(ConvState::HandleCart).with_effect(Effect::ShowCart)
        }
        ControlToken::Pay => {
            TransitionResult::new(ConvState::WaitingEmail).with_effect(Effect::PromptEmail)
        }
    }
}

#[cfg(test)]
pub(crate) fn message_ref(chat_id: &str, message_id: i64) -> MessageRef {
    MessageRef {
        chat_id: chat_id.to_string(),
        message_id,
    }
}
