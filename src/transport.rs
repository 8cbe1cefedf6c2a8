//! Telegram Bot API transport
//!
//! Users talk to the bot in private chats, so a user id doubles as the chat id.

use crate::backend::UserId;
use crate::render::Keyboard;
use crate::runtime::{Transport, TransportError};
use crate::state_machine::MessageRef;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_url: String,
    pub bot_token: String,
    pub timeout: Duration,
}

pub struct TelegramTransport {
    client: Client,
    config: TelegramConfig,
}

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
    chat: Chat,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Serialize)]
struct InlineButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

impl TelegramTransport {
    pub fn new(config: TelegramConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Request(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.config.api_url.trim_end_matches('/'),
            self.config.bot_token
        )
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Request(format!("{method}: {e}")))?;
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Request(format!("{method}: {e}")))?;
        parse_response(method, &body)
    }
}

/// `reply_markup` value for an inline keyboard
fn reply_markup(keyboard: &Keyboard) -> serde_json::Value {
    let rows: Vec<Vec<InlineButton<'_>>> = keyboard
        .rows()
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| InlineButton {
                    text: &b.label,
                    callback_data: &b.token,
                })
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

fn parse_response<T: serde::de::DeserializeOwned>(
    method: &str,
    body: &str,
) -> Result<T, TransportError> {
    let envelope: ApiResponse<T> = serde_json::from_str(body)
        .map_err(|e| TransportError::Request(format!("{method}: undecodable response: {e}")))?;
    if !envelope.ok {
        return Err(TransportError::Refused(format!(
            "{method}: {}",
            envelope.description.unwrap_or_default()
        )));
    }
    envelope
        .result
        .ok_or_else(|| TransportError::Request(format!("{method}: response without result")))
}

fn message_ref(sent: &SentMessage) -> MessageRef {
    MessageRef {
        chat_id: sent.chat.id.to_string(),
        message_id: sent.message_id,
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(
        &self,
        user: &UserId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, TransportError> {
        let mut body = json!({ "chat_id": user.as_str(), "text": text });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = reply_markup(keyboard);
        }
        let request = self.client.post(self.method_url("sendMessage")).json(&body);
        let sent: SentMessage = self.call("sendMessage", request).await?;
        Ok(message_ref(&sent))
    }

    async fn send_photo(
        &self,
        user: &UserId,
        photo: Vec<u8>,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, TransportError> {
        let mut form = Form::new()
            .text("chat_id", user.as_str().to_string())
            .text("caption", caption.to_string())
            .part("photo", Part::bytes(photo).file_name("photo.jpg"));
        if let Some(keyboard) = keyboard {
            form = form.text("reply_markup", reply_markup(keyboard).to_string());
        }
        let request = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form);
        let sent: SentMessage = self.call("sendPhoto", request).await?;
        Ok(message_ref(&sent))
    }

    async fn delete_message(&self, message: &MessageRef) -> Result<(), TransportError> {
        let body = json!({ "chat_id": message.chat_id, "message_id": message.message_id });
        let request = self
            .client
            .post(self.method_url("deleteMessage"))
            .json(&body);
        let _: bool = self.call("deleteMessage", request).await?;
        Ok(())
    }
}
