//! Telegram `Update` payloads and their normalized inbound events.
//!
//! Updates are decoded exactly once, at the webhook boundary; everything
//! downstream works with [`InboundEvent`].

use serde::Deserialize;
use thiserror::Error;

use orderdesk_core::domain::order::{Sender, UserId};

use crate::client::{CallbackRef, ChatRef, PostRef};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("malformed update payload: {0}")]
    Malformed(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub channel_post: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub caption: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl From<&User> for Sender {
    fn from(user: &User) -> Self {
        Sender {
            id: UserId(user.id),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            username: user.username.clone(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateEnvelope {
    pub update_id: i64,
    pub event: InboundEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    BroadcastPost(BroadcastPost),
    ControlActivation(ControlActivation),
    TextMessage(TextMessage),
    Command(Command),
    Unsupported { kind: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InboundEventType {
    BroadcastPost,
    ControlActivation,
    TextMessage,
    Command,
    Unsupported,
}

/// Sequential lane an event is processed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LaneKey {
    User(UserId),
    Chat(i64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadcastPost {
    pub post: PostRef,
    pub caption: Option<String>,
    pub text: Option<String>,
}

impl BroadcastPost {
    pub fn has_content(&self) -> bool {
        [self.caption.as_deref(), self.text.as_deref()]
            .into_iter()
            .flatten()
            .any(|value| !value.trim().is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlActivation {
    pub callback: CallbackRef,
    pub sender: Sender,
    pub token: Option<String>,
    /// Post the control was attached to, when Telegram still exposes it.
    pub post: Option<PostRef>,
    pub post_caption: Option<String>,
    pub post_text: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextMessage {
    pub chat: ChatRef,
    pub sender: Sender,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub chat: ChatRef,
    pub sender: Sender,
    /// Lowercased name without the leading slash or `@bot` suffix.
    pub name: String,
    pub args: String,
}

impl InboundEvent {
    pub fn event_type(&self) -> InboundEventType {
        match self {
            Self::BroadcastPost(_) => InboundEventType::BroadcastPost,
            Self::ControlActivation(_) => InboundEventType::ControlActivation,
            Self::TextMessage(_) => InboundEventType::TextMessage,
            Self::Command(_) => InboundEventType::Command,
            Self::Unsupported { .. } => InboundEventType::Unsupported,
        }
    }

    pub fn lane_key(&self) -> Option<LaneKey> {
        match self {
            Self::BroadcastPost(post) => Some(LaneKey::Chat(post.post.chat_id)),
            Self::ControlActivation(activation) => Some(LaneKey::User(activation.sender.id)),
            Self::TextMessage(message) => Some(LaneKey::User(message.sender.id)),
            Self::Command(command) => Some(LaneKey::User(command.sender.id)),
            Self::Unsupported { .. } => None,
        }
    }
}

pub fn decode_update(body: &[u8]) -> Result<UpdateEnvelope, TransportError> {
    let update: Update =
        serde_json::from_slice(body).map_err(|error| TransportError::Malformed(error.to_string()))?;
    Ok(normalize(update))
}

pub fn normalize(update: Update) -> UpdateEnvelope {
    let event = if let Some(post) = update.channel_post {
        InboundEvent::BroadcastPost(BroadcastPost {
            post: PostRef { chat_id: post.chat.id, message_id: post.message_id },
            caption: post.caption,
            text: post.text,
        })
    } else if let Some(query) = update.callback_query {
        let (post, post_caption, post_text) = match query.message {
            Some(message) => (
                Some(PostRef { chat_id: message.chat.id, message_id: message.message_id }),
                message.caption,
                message.text,
            ),
            None => (None, None, None),
        };
        InboundEvent::ControlActivation(ControlActivation {
            callback: CallbackRef(query.id),
            sender: Sender::from(&query.from),
            token: query.data,
            post,
            post_caption,
            post_text,
        })
    } else if let Some(message) = update.message {
        normalize_message(message)
    } else {
        InboundEvent::Unsupported { kind: "unknown_update".to_owned() }
    };

    UpdateEnvelope { update_id: update.update_id, event }
}

fn normalize_message(message: Message) -> InboundEvent {
    let Some(user) = message.from.as_ref() else {
        return InboundEvent::Unsupported { kind: "anonymous_message".to_owned() };
    };
    let Some(text) = message.text else {
        return InboundEvent::Unsupported { kind: "message_without_text".to_owned() };
    };
    let chat = ChatRef(message.chat.id);
    let sender = Sender::from(user);

    match parse_command(&text) {
        Some((name, args)) => InboundEvent::Command(Command { chat, sender, name, args }),
        None => InboundEvent::TextMessage(TextMessage { chat, sender, text }),
    }
}

fn parse_command(text: &str) -> Option<(String, String)> {
    let rest = text.trim_start().strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or_default();
    if name.is_empty() {
        return None;
    }
    Some((name.to_lowercase(), args.to_owned()))
}
