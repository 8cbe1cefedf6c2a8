//! Telegram webhook payloads
//!
//! Only the fields the bot acts on are modelled; everything else in an
//! `Update` is ignored.

use crate::backend::UserId;
use crate::state_machine::{InboundEvent, InboundKind, MessageRef};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

impl Update {
    /// The conversation event this update carries, if any
    pub fn into_inbound(self) -> Option<InboundEvent> {
        if let Some(query) = self.callback_query {
            let message = query.message?;
            return Some(InboundEvent {
                session_id: message.chat.id.to_string(),
                user_id: UserId::new(query.from.id.to_string()),
                kind: InboundKind::Button,
                payload: query.data?,
                message: Some(MessageRef {
                    chat_id: message.chat.id.to_string(),
                    message_id: message.message_id,
                }),
            });
        }

        let message = self.message?;
        let text = message.text?;
        let user = message.from.map_or(message.chat.id, |u| u.id);
        let kind = if text.starts_with('/') {
            InboundKind::Command
        } else {
            InboundKind::Text
        };
        Some(InboundEvent {
            session_id: message.chat.id.to_string(),
            user_id: UserId::new(user.to_string()),
            kind,
            payload: text,
            message: None,
        })
    }
}
