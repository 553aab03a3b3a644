use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    annotator::PostAnnotator,
    client::{ChatClient, ChatClientError},
    conversation::{ConversationError, OrderConversation, ReplyOutcome},
    keyboard::ORDER_TOKEN,
    replies::GREETING,
    update::{InboundEvent, InboundEventType, UpdateEnvelope},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl EventContext {
    pub fn for_update(update_id: i64) -> Self {
        Self { correlation_id: format!("update-{update_id}") }
    }
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Processed,
    Ignored,
}

#[derive(Debug, Error)]
pub enum EventHandlerError {
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error(transparent)]
    Chat(#[from] ChatClientError),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> InboundEventType;
    async fn handle(
        &self,
        envelope: &UpdateEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

/// Routes each event to the handler registered for its kind. Holds no
/// state beyond the registrations.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<InboundEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &UpdateEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

pub fn order_dispatcher(
    conversation: Arc<OrderConversation>,
    chat: Arc<dyn ChatClient>,
) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(BroadcastPostHandler::new(PostAnnotator::new(chat.clone())));
    dispatcher.register(ControlActivationHandler::new(conversation.clone(), chat.clone()));
    dispatcher.register(TextMessageHandler::new(conversation.clone()));
    dispatcher.register(CommandHandler::new(conversation, chat));
    dispatcher
}

pub struct BroadcastPostHandler {
    annotator: PostAnnotator,
}

impl BroadcastPostHandler {
    pub fn new(annotator: PostAnnotator) -> Self {
        Self { annotator }
    }
}

#[async_trait]
impl EventHandler for BroadcastPostHandler {
    fn event_type(&self) -> InboundEventType {
        InboundEventType::BroadcastPost
    }

    async fn handle(
        &self,
        envelope: &UpdateEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let InboundEvent::BroadcastPost(post) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if !post.has_content() {
            return Ok(HandlerResult::Ignored);
        }

        if let Err(error) = self.annotator.annotate(post, ctx).await {
            warn!(
                event_name = "annotator.control_failed",
                correlation_id = %ctx.correlation_id,
                chat_id = post.post.chat_id,
                message_id = post.post.message_id,
                error = %error,
                "could not attach order control"
            );
        }
        Ok(HandlerResult::Processed)
    }
}

pub struct ControlActivationHandler {
    conversation: Arc<OrderConversation>,
    chat: Arc<dyn ChatClient>,
}

impl ControlActivationHandler {
    pub fn new(conversation: Arc<OrderConversation>, chat: Arc<dyn ChatClient>) -> Self {
        Self { conversation, chat }
    }
}

#[async_trait]
impl EventHandler for ControlActivationHandler {
    fn event_type(&self) -> InboundEventType {
        InboundEventType::ControlActivation
    }

    async fn handle(
        &self,
        envelope: &UpdateEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let InboundEvent::ControlActivation(activation) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        if activation.token.as_deref() == Some(ORDER_TOKEN) {
            self.conversation.start_order(activation, ctx).await?;
            return Ok(HandlerResult::Processed);
        }

        debug!(
            event_name = "dispatch.unknown_control",
            correlation_id = %ctx.correlation_id,
            token = activation.token.as_deref().unwrap_or_default(),
            "control activation with unrecognised token"
        );
        self.chat.acknowledge_callback(&activation.callback).await?;
        Ok(HandlerResult::Ignored)
    }
}

pub struct TextMessageHandler {
    conversation: Arc<OrderConversation>,
}

impl TextMessageHandler {
    pub fn new(conversation: Arc<OrderConversation>) -> Self {
        Self { conversation }
    }
}

#[async_trait]
impl EventHandler for TextMessageHandler {
    fn event_type(&self) -> InboundEventType {
        InboundEventType::TextMessage
    }

    async fn handle(
        &self,
        envelope: &UpdateEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let InboundEvent::TextMessage(message) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if !self.conversation.has_open_session(&message.sender.id).await {
            return Ok(HandlerResult::Ignored);
        }

        Ok(match self.conversation.handle_reply(message, ctx).await? {
            ReplyOutcome::Ignored => HandlerResult::Ignored,
            ReplyOutcome::AwaitingPhone
            | ReplyOutcome::Committed(_)
            | ReplyOutcome::LedgerFailed { .. }
            | ReplyOutcome::Unconfirmed(_) => HandlerResult::Processed,
        })
    }
}

pub struct CommandHandler {
    conversation: Arc<OrderConversation>,
    chat: Arc<dyn ChatClient>,
}

impl CommandHandler {
    pub fn new(conversation: Arc<OrderConversation>, chat: Arc<dyn ChatClient>) -> Self {
        Self { conversation, chat }
    }
}

#[async_trait]
impl EventHandler for CommandHandler {
    fn event_type(&self) -> InboundEventType {
        InboundEventType::Command
    }

    async fn handle(
        &self,
        envelope: &UpdateEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let InboundEvent::Command(command) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        match command.name.as_str() {
            "start" => {
                self.chat.send_message(command.chat, GREETING).await?;
                Ok(HandlerResult::Processed)
            }
            "cancel" => Ok(if self.conversation.cancel(command, ctx).await? {
                HandlerResult::Processed
            } else {
                HandlerResult::Ignored
            }),
            _ => Ok(HandlerResult::Ignored),
        }
    }
}
