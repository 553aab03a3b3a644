use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;

use crate::keyboard::InlineKeyboardMarkup;

/// A message inside a chat, typically a channel post.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PostRef {
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatRef(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallbackRef(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChatOperation {
    EditControls,
    SendMessage,
    AcknowledgeCallback,
}

impl ChatOperation {
    pub fn method(&self) -> &'static str {
        match self {
            Self::EditControls => "editMessageReplyMarkup",
            Self::SendMessage => "sendMessage",
            Self::AcknowledgeCallback => "answerCallbackQuery",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChatClientError {
    #[error("chat transport failed: {0}")]
    Transport(String),
    #[error("{method} was refused ({code}): {description}")]
    Api { method: &'static str, code: i64, description: String },
    #[error("chat response could not be decoded: {0}")]
    Decode(String),
}

/// Outbound chat actions the engine performs.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn edit_controls(
        &self,
        post: &PostRef,
        controls: &InlineKeyboardMarkup,
    ) -> Result<(), ChatClientError>;

    async fn send_message(&self, chat: ChatRef, text: &str) -> Result<MessageRef, ChatClientError>;

    async fn acknowledge_callback(&self, callback: &CallbackRef) -> Result<(), ChatClientError>;
}

pub struct NoopChatClient;

#[async_trait]
impl ChatClient for NoopChatClient {
    async fn edit_controls(
        &self,
        _post: &PostRef,
        _controls: &InlineKeyboardMarkup,
    ) -> Result<(), ChatClientError> {
        Ok(())
    }

    async fn send_message(
        &self,
        chat: ChatRef,
        _text: &str,
    ) -> Result<MessageRef, ChatClientError> {
        Ok(MessageRef { chat_id: chat.0, message_id: 0 })
    }

    async fn acknowledge_callback(&self, _callback: &CallbackRef) -> Result<(), ChatClientError> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatAction {
    EditControls { post: PostRef, controls: InlineKeyboardMarkup },
    SendMessage { chat: ChatRef, text: String },
    AcknowledgeCallback { callback: CallbackRef },
}

#[derive(Default)]
struct RecordingState {
    actions: Vec<ChatAction>,
    failures: Vec<(ChatOperation, ChatClientError)>,
    next_message_id: i64,
}

/// Keeps every successful action in order; scripted failures are consumed
/// once, by the first matching call, and leave no record.
#[derive(Default)]
pub struct RecordingChatClient {
    state: Mutex<RecordingState>,
}

impl RecordingChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, operation: ChatOperation, error: ChatClientError) {
        self.lock().failures.push((operation, error));
    }

    pub fn actions(&self) -> Vec<ChatAction> {
        self.lock().actions.clone()
    }

    /// Texts sent to `chat`, oldest first.
    pub fn messages_to(&self, chat: ChatRef) -> Vec<String> {
        self.lock()
            .actions
            .iter()
            .filter_map(|action| match action {
                ChatAction::SendMessage { chat: target, text } if *target == chat => {
                    Some(text.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().actions.clear();
    }

    fn record(&self, operation: ChatOperation, action: ChatAction) -> Result<i64, ChatClientError> {
        let mut state = self.lock();
        if let Some(index) = state.failures.iter().position(|(op, _)| *op == operation) {
            let (_, error) = state.failures.remove(index);
            return Err(error);
        }
        state.actions.push(action);
        state.next_message_id += 1;
        Ok(state.next_message_id)
    }

    fn lock(&self) -> MutexGuard<'_, RecordingState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ChatClient for RecordingChatClient {
    async fn edit_controls(
        &self,
        post: &PostRef,
        controls: &InlineKeyboardMarkup,
    ) -> Result<(), ChatClientError> {
        self.record(
            ChatOperation::EditControls,
            ChatAction::EditControls { post: *post, controls: controls.clone() },
        )
        .map(|_| ())
    }

    async fn send_message(&self, chat: ChatRef, text: &str) -> Result<MessageRef, ChatClientError> {
        let message_id = self.record(
            ChatOperation::SendMessage,
            ChatAction::SendMessage { chat, text: text.to_owned() },
        )?;
        Ok(MessageRef { chat_id: chat.0, message_id })
    }

    async fn acknowledge_callback(&self, callback: &CallbackRef) -> Result<(), ChatClientError> {
        self.record(
            ChatOperation::AcknowledgeCallback,
            ChatAction::AcknowledgeCallback { callback: callback.clone() },
        )
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ChatAction, ChatClient, ChatClientError, ChatOperation, ChatRef, RecordingChatClient,
    };

    #[tokio::test]
    async fn recording_client_consumes_scripted_failures_once() {
        let client = RecordingChatClient::new();
        client.fail_next(
            ChatOperation::SendMessage,
            ChatClientError::Transport("connection reset".to_owned()),
        );

        let first = client.send_message(ChatRef(7), "перше").await;
        assert!(matches!(first, Err(ChatClientError::Transport(_))));

        let second = client.send_message(ChatRef(7), "друге").await.expect("second send");
        assert_eq!(second.chat_id, 7);
        assert_eq!(client.messages_to(ChatRef(7)), vec!["друге".to_owned()]);
        assert_eq!(
            client.actions(),
            vec![ChatAction::SendMessage { chat: ChatRef(7), text: "друге".to_owned() }]
        );
    }

    #[test]
    fn operations_name_their_bot_api_methods() {
        assert_eq!(ChatOperation::EditControls.method(), "editMessageReplyMarkup");
        assert_eq!(ChatOperation::AcknowledgeCallback.method(), "answerCallbackQuery");
    }
}
