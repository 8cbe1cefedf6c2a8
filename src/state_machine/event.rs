//! Events that can occur in a conversation

use crate::backend::UserId;
use serde::{Deserialize, Serialize};

/// Command that forces a session back to the start of the flow
pub const RESTART_COMMAND: &str = "/start";

/// How the transport delivered an inbound payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundKind {
    Text,
    Button,
    Command,
}

/// Transport handle to a previously sent message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: String,
    pub message_id: i64,
}

/// Event as delivered by the messaging transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub session_id: String,
    pub user_id: UserId,
    pub kind: InboundKind,
    pub payload: String,
    /// Message the tapped button belonged to
    #[serde(default)]
    pub message: Option<MessageRef>,
}

/// Reserved button payloads, recognized before any catalog interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlToken {
    BackToMenu,
    ShowCart,
    Pay,
}

impl ControlToken {
    pub const ALL: [ControlToken; 3] = [Self::BackToMenu, Self::ShowCart, Self::Pay];

    pub fn as_str(self) -> &'static str {
        match self {
            ControlToken::BackToMenu => "back_to_menu",
            ControlToken::ShowCart => "show_cart",
            ControlToken::Pay => "pay",
        }
    }

    pub fn parse(payload: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == payload)
    }
}

/// Parsed button payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Control(ControlToken),
    /// Product id or quantity, depending on the state
    Numeric(u64),
    Other(String),
}

impl Token {
    pub fn parse(payload: &str) -> Self {
        if let Some(control) = ControlToken::parse(payload) {
            return Token::Control(control);
        }
        payload
            .parse()
            .map_or_else(|_| Token::Other(payload.to_string()), Token::Numeric)
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // User events
    Restart,
    Text {
        text: String,
    },
    Button {
        token: Token,
        message: Option<MessageRef>,
    },

    // Checkout outcomes, produced while executing effects
    EmailAccepted,
    EmailRejected,
}

impl Event {
    pub fn from_inbound(inbound: &InboundEvent) -> Self {
        match inbound.kind {
            InboundKind::Text | InboundKind::Command if is_restart(&inbound.payload) => {
                Event::Restart
            }
            InboundKind::Text | InboundKind::Command => Event::Text {
                text: inbound.payload.clone(),
            },
            InboundKind::Button => Event::Button {
                token: Token::parse(&inbound.payload),
                message: inbound.message.clone(),
            },
        }
    }

    pub fn is_restart(&self) -> bool {
        matches!(self, Event::Restart)
    }
}

/// `/start`, optionally addressed to a bot (`/start@grocery_bot`)
fn is_restart(payload: &str) -> bool {
    let command = payload.trim();
    let command = command.split_once('@').map_or(command, |(name, _)| name);
    command == RESTART_COMMAND
}
