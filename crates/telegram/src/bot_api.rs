//! Telegram Bot API client over HTTPS.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::client::{
    CallbackRef, ChatClient, ChatClientError, ChatOperation, ChatRef, MessageRef, PostRef,
};
use crate::keyboard::InlineKeyboardMarkup;
use crate::update::Message;

/// Update kinds the webhook subscribes to.
pub const ALLOWED_UPDATES: [&str; 3] = ["message", "channel_post", "callback_query"];

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

#[derive(Serialize)]
struct EditReplyMarkup<'a> {
    chat_id: i64,
    message_id: i64,
    reply_markup: &'a InlineKeyboardMarkup,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Serialize)]
struct AnswerCallbackQuery<'a> {
    callback_query_id: &'a str,
}

#[derive(Serialize)]
struct SetWebhook<'a> {
    url: &'a str,
    allowed_updates: &'a [&'a str],
}

pub struct BotApiClient {
    http: reqwest::Client,
    /// `<api base>/bot<token>`; kept secret because it embeds the token.
    endpoint: SecretString,
}

impl BotApiClient {
    pub fn new(
        api_base_url: &str,
        bot_token: &SecretString,
        timeout: Duration,
    ) -> Result<Self, ChatClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build().map_err(transport_error)?;
        let endpoint =
            format!("{}/bot{}", api_base_url.trim_end_matches('/'), bot_token.expose_secret());
        Ok(Self { http, endpoint: endpoint.into() })
    }

    /// Points Telegram at `url` for update delivery.
    pub async fn set_webhook(&self, url: &str) -> Result<(), ChatClientError> {
        let _: bool = self
            .call("setWebhook", &SetWebhook { url, allowed_updates: &ALLOWED_UPDATES })
            .await?;
        Ok(())
    }

    async fn call<P, T>(&self, method: &'static str, params: &P) -> Result<T, ChatClientError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{method}", self.endpoint.expose_secret());
        let response =
            self.http.post(url).json(params).send().await.map_err(transport_error)?;
        let status = response.status();

        // Refusals arrive as 4xx with the same JSON envelope, so the body is
        // decoded regardless of status.
        let body: ApiResponse<T> = response.json().await.map_err(|error| {
            ChatClientError::Decode(format!("{method} ({status}): {}", error.without_url()))
        })?;
        debug!(event_name = "telegram.api.call", method, status = status.as_u16(), ok = body.ok);

        match body {
            ApiResponse { ok: true, result: Some(result), .. } => Ok(result),
            ApiResponse { ok: true, result: None, .. } => {
                Err(ChatClientError::Decode(format!("{method} returned ok without a result")))
            }
            ApiResponse { description, error_code, .. } => Err(ChatClientError::Api {
                method,
                code: error_code.unwrap_or_else(|| i64::from(status.as_u16())),
                description: description.unwrap_or_else(|| "no description".to_owned()),
            }),
        }
    }
}

#[async_trait]
impl ChatClient for BotApiClient {
    async fn edit_controls(
        &self,
        post: &PostRef,
        controls: &InlineKeyboardMarkup,
    ) -> Result<(), ChatClientError> {
        let params = EditReplyMarkup {
            chat_id: post.chat_id,
            message_id: post.message_id,
            reply_markup: controls,
        };
        let _: Value = self.call(ChatOperation::EditControls.method(), &params).await?;
        Ok(())
    }

    async fn send_message(&self, chat: ChatRef, text: &str) -> Result<MessageRef, ChatClientError> {
        let params = SendMessage { chat_id: chat.0, text };
        let sent: Message = self.call(ChatOperation::SendMessage.method(), &params).await?;
        Ok(MessageRef { chat_id: sent.chat.id, message_id: sent.message_id })
    }

    async fn acknowledge_callback(&self, callback: &CallbackRef) -> Result<(), ChatClientError> {
        let params = AnswerCallbackQuery { callback_query_id: &callback.0 };
        let _: bool = self.call(ChatOperation::AcknowledgeCallback.method(), &params).await?;
        Ok(())
    }
}

fn transport_error(error: reqwest::Error) -> ChatClientError {
    ChatClientError::Transport(error.without_url().to_string())
}
