//! Telegram integration - webhook updates in, Bot API calls out
//!
//! This crate provides the chat side of orderdesk:
//! - **Updates** (`update`) - decode Telegram `Update` JSON into tagged inbound events
//! - **Queue** (`queue`) - per-user and per-channel sequential lanes
//! - **Events** (`events`) - dispatcher routing each event kind to its handler
//! - **Annotator** (`annotator`) - attaches the "🛒 Замовити" button to channel posts
//! - **Conversation** (`conversation`) - quantity then phone dialogue, ledger commit
//! - **Bot API** (`bot_api`) - HTTPS client for the outbound chat actions
//!
//! # Architecture
//!
//! ```text
//! Webhook → decode_update → EventQueue lane → EventDispatcher → Handlers
//!                                                  ↓
//!                       ChatClient ← OrderConversation → OrderLedger
//! ```

pub mod annotator;
pub mod bot_api;
pub mod client;
pub mod conversation;
pub mod events;
pub mod keyboard;
pub mod queue;
pub mod replies;
pub mod update;

pub use annotator::{AnnotationError, PostAnnotator};
pub use bot_api::BotApiClient;
pub use client::{
    CallbackRef, ChatAction, ChatClient, ChatClientError, ChatOperation, ChatRef, MessageRef,
    NoopChatClient, PostRef, RecordingChatClient,
};
pub use conversation::{
    ConversationError, ConversationSettings, OrderConversation, ReplyOutcome,
};
pub use events::{
    order_dispatcher, DispatchError, EventContext, EventDispatcher, EventHandler,
    EventHandlerError, HandlerResult,
};
pub use queue::{EnqueueOutcome, EventQueue, QueueError};
pub use update::{decode_update, InboundEvent, LaneKey, TransportError, UpdateEnvelope};
