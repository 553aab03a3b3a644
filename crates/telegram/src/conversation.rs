//! Per-user order intake dialogue.
//!
//! Transitions come from the flow engine and are applied under the user's
//! session lock; every chat or ledger call happens after that lock is
//! released.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use orderdesk_core::config::AppConfig;
use orderdesk_core::domain::order::{OrderRecord, Sender, UserId};
use orderdesk_core::domain::session::{describe_product, Session, SessionId};
use orderdesk_core::errors::{ApplicationError, DomainError, InterfaceError};
use orderdesk_core::flows::{
    FlowAction, FlowEngine, FlowEvent, FlowState, FlowTransitionError, OrderIntakeFlow,
    TransitionOutcome,
};
use orderdesk_core::ledger::{LedgerError, OrderLedger};
use orderdesk_core::retry::RetryPolicy;
use orderdesk_core::sessions::{SessionStore, SessionStoreError};

use crate::client::{ChatClient, ChatClientError, ChatRef, MessageRef};
use crate::events::EventContext;
use crate::replies::{
    operator_notification, operator_unconfirmed_alert, CANCEL_CONFIRMATION, OPEN_BOT_FIRST,
    ORDER_CONFIRMATION, PHONE_PROMPT, QUANTITY_PROMPT,
};
use crate::update::{Command, ControlActivation, TextMessage};

#[derive(Clone, Debug)]
pub struct ConversationSettings {
    pub product_max_chars: usize,
    pub operator_chat: ChatRef,
    pub ledger_retry: RetryPolicy,
}

impl ConversationSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            product_max_chars: config.ordering.product_max_chars,
            operator_chat: ChatRef(config.telegram.operator_chat_id),
            ledger_retry: config.ledger_retry_policy(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error(transparent)]
    Dialogue(#[from] SessionStoreError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Chat(#[from] ChatClientError),
    #[error("ledger append failed after {attempts} attempt(s): {source}")]
    LedgerWrite { attempts: u32, source: LedgerError },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// No open dialogue, or a ledger write is already in flight.
    Ignored,
    AwaitingPhone,
    Committed(OrderRecord),
    LedgerFailed { attempts: u32 },
    /// The ledger may hold the order; the operator was asked to check.
    Unconfirmed(OrderRecord),
}

pub struct OrderConversation {
    engine: FlowEngine<OrderIntakeFlow>,
    sessions: Arc<SessionStore>,
    chat: Arc<dyn ChatClient>,
    ledger: Arc<dyn OrderLedger>,
    settings: ConversationSettings,
}

impl OrderConversation {
    pub fn new(
        sessions: Arc<SessionStore>,
        chat: Arc<dyn ChatClient>,
        ledger: Arc<dyn OrderLedger>,
        settings: ConversationSettings,
    ) -> Self {
        Self { engine: FlowEngine::default(), sessions, chat, ledger, settings }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub async fn has_open_session(&self, user_id: &UserId) -> bool {
        self.sessions.contains(user_id).await
    }

    pub async fn open_sessions(&self) -> usize {
        self.sessions.open_sessions().await
    }

    /// Opens a fresh dialogue for the activating user, replacing any
    /// previous one, and asks for the quantity in their private chat.
    pub async fn start_order(
        &self,
        activation: &ControlActivation,
        ctx: &EventContext,
    ) -> Result<Session, ConversationError> {
        let user_id = activation.sender.id;
        let current = match self.sessions.get(&user_id).await {
            Some(session) => FlowState::from(session.step),
            None => self.engine.initial_state(),
        };
        let outcome = self
            .engine
            .apply(&current, &FlowEvent::StartOrder)
            .map_err(|error| ConversationError::Domain(error.into()))?;

        let session = Session::open(
            user_id,
            describe_product(
                activation.post_caption.as_deref(),
                activation.post_text.as_deref(),
                self.settings.product_max_chars,
            ),
            Utc::now(),
        );
        let private_chat = ChatRef(user_id.0);

        for action in &outcome.actions {
            match action {
                FlowAction::AcknowledgeControl => {
                    if let Err(error) = self.chat.acknowledge_callback(&activation.callback).await {
                        warn!(
                            event_name = "conversation.callback_ack_failed",
                            correlation_id = %ctx.correlation_id,
                            user_id = %user_id,
                            error = %error,
                            "could not acknowledge control activation"
                        );
                    }
                }
                FlowAction::OpenSession => {
                    if let Some(replaced) = self.sessions.put(session.clone()).await {
                        info!(
                            event_name = "conversation.session_restarted",
                            correlation_id = %ctx.correlation_id,
                            user_id = %user_id,
                            replaced_session_id = %replaced.session_id,
                            "previous dialogue replaced"
                        );
                    }
                }
                FlowAction::PromptForQuantity => {
                    if let Err(error) = self.chat.send_message(private_chat, QUANTITY_PROMPT).await
                    {
                        self.drop_unreachable(activation, &session, &error, ctx).await;
                        return Err(error.into());
                    }
                }
                _ => {}
            }
        }

        info!(
            event_name = "conversation.order_started",
            correlation_id = %ctx.correlation_id,
            user_id = %user_id,
            session_id = %session.session_id,
            product = %session.product_descriptor,
            "order dialogue opened"
        );
        Ok(session)
    }

    pub async fn handle_reply(
        &self,
        message: &TextMessage,
        ctx: &EventContext,
    ) -> Result<ReplyOutcome, ConversationError> {
        let user_id = message.sender.id;
        let now = Utc::now();
        let (session, outcome) = match self
            .advance(&user_id, FlowEvent::ReplyReceived, Some(&message.text), now)
            .await
        {
            Ok(advanced) => advanced,
            Err(SessionStoreError::NotFound(_)) | Err(SessionStoreError::Rejected(_)) => {
                debug!(
                    event_name = "conversation.reply_ignored",
                    correlation_id = %ctx.correlation_id,
                    user_id = %user_id,
                    "reply outside of an accepting dialogue step"
                );
                return Ok(ReplyOutcome::Ignored);
            }
        };

        if outcome.has_action(&FlowAction::PromptForPhone) {
            self.chat.send_message(message.chat, PHONE_PROMPT).await?;
            return Ok(ReplyOutcome::AwaitingPhone);
        }
        if outcome.has_action(&FlowAction::AppendOrder) {
            return self.submit(&session, &message.sender, message.chat, ctx).await;
        }
        Ok(ReplyOutcome::Ignored)
    }

    /// Abandons the user's dialogue. Returns `false` when nothing was open
    /// or a ledger write is in flight.
    pub async fn cancel(
        &self,
        command: &Command,
        ctx: &EventContext,
    ) -> Result<bool, ConversationError> {
        let user_id = command.sender.id;
        let Ok((session, outcome)) =
            self.advance(&user_id, FlowEvent::CancelRequested, None, Utc::now()).await
        else {
            return Ok(false);
        };

        for action in &outcome.actions {
            match action {
                FlowAction::CloseSession => {
                    self.close(&user_id, session.session_id).await;
                }
                FlowAction::ConfirmCancel => {
                    self.chat.send_message(command.chat, CANCEL_CONFIRMATION).await?;
                }
                _ => {}
            }
        }
        info!(
            event_name = "conversation.order_cancelled",
            correlation_id = %ctx.correlation_id,
            user_id = %user_id,
            session_id = %session.session_id,
            "order dialogue cancelled"
        );
        Ok(true)
    }

    /// Abandons dialogues untouched since `cutoff`. A dialogue with a ledger
    /// write in flight cannot expire and is kept.
    pub async fn expire_idle(&self, cutoff: DateTime<Utc>) -> Vec<Session> {
        let expired = self
            .sessions
            .remove_where(|session| {
                session.is_idle_since(cutoff)
                    && self
                        .engine
                        .apply(&FlowState::from(session.step), &FlowEvent::SessionExpired)
                        .is_ok_and(|outcome| outcome.has_action(&FlowAction::CloseSession))
            })
            .await;
        for session in &expired {
            info!(
                event_name = "conversation.session_expired",
                user_id = %session.user_id,
                session_id = %session.session_id,
                step = ?session.step,
                "idle dialogue abandoned"
            );
        }
        expired
    }

    async fn submit(
        &self,
        session: &Session,
        sender: &Sender,
        reply_chat: ChatRef,
        ctx: &EventContext,
    ) -> Result<ReplyOutcome, ConversationError> {
        let order = match OrderRecord::from_session(session, sender, Utc::now()) {
            Ok(order) => order,
            Err(error) => {
                self.release_submission(session).await;
                return Err(error.into());
            }
        };

        match self.append_with_retry(&order, ctx).await {
            Ok(attempts) => self.commit(session, order, attempts, reply_chat, ctx).await,
            Err(ConversationError::LedgerWrite {
                attempts,
                source: source @ LedgerError::Unconfirmed(_),
            }) => self.escalate(session, order, attempts, &source, reply_chat, ctx).await,
            Err(ConversationError::LedgerWrite { attempts, source }) => {
                self.report_ledger_failure(session, attempts, &source, reply_chat, ctx).await
            }
            Err(other) => Err(other),
        }
    }

    async fn commit(
        &self,
        session: &Session,
        order: OrderRecord,
        attempts: u32,
        reply_chat: ChatRef,
        ctx: &EventContext,
    ) -> Result<ReplyOutcome, ConversationError> {
        let outcome = self
            .engine
            .apply(&FlowState::Submitting, &FlowEvent::LedgerAppended)
            .map_err(|error| ConversationError::Domain(error.into()))?;

        info!(
            event_name = "conversation.order_committed",
            correlation_id = %ctx.correlation_id,
            user_id = %session.user_id,
            session_id = %session.session_id,
            ledger = self.ledger.backend(),
            attempts,
            "order appended to ledger"
        );

        self.finish(session, &order, &outcome, None, reply_chat, ctx).await;
        Ok(ReplyOutcome::Committed(order))
    }

    /// Closes a dialogue whose append may or may not have landed. The row
    /// is never written again; the operator verifies it by hand.
    async fn escalate(
        &self,
        session: &Session,
        order: OrderRecord,
        attempts: u32,
        source: &LedgerError,
        reply_chat: ChatRef,
        ctx: &EventContext,
    ) -> Result<ReplyOutcome, ConversationError> {
        let outcome = self
            .engine
            .apply(&FlowState::Submitting, &FlowEvent::LedgerUnconfirmed)
            .map_err(|error| ConversationError::Domain(error.into()))?;

        error!(
            event_name = "ledger.append_unconfirmed",
            correlation_id = %ctx.correlation_id,
            user_id = %session.user_id,
            session_id = %session.session_id,
            ledger = self.ledger.backend(),
            attempts,
            error = %source,
            "ledger may already hold the order; operator asked to verify"
        );

        let notice = ApplicationError::LedgerUnconfirmed(source.to_string())
            .into_interface(ctx.correlation_id.clone());
        self.finish(session, &order, &outcome, Some(&notice), reply_chat, ctx).await;
        Ok(ReplyOutcome::Unconfirmed(order))
    }

    /// Runs the closing actions of a submitted dialogue. The ledger call is
    /// over, so delivery problems are only logged.
    async fn finish(
        &self,
        session: &Session,
        order: &OrderRecord,
        outcome: &TransitionOutcome,
        notice: Option<&InterfaceError>,
        reply_chat: ChatRef,
        ctx: &EventContext,
    ) {
        let operator = self.settings.operator_chat;
        for action in &outcome.actions {
            let delivery = match action {
                FlowAction::CloseSession => {
                    self.close(&session.user_id, session.session_id).await;
                    continue;
                }
                FlowAction::ConfirmOrder => {
                    self.chat.send_message(reply_chat, ORDER_CONFIRMATION).await
                }
                FlowAction::NotifyOperator => {
                    self.chat.send_message(operator, &operator_notification(order)).await
                }
                FlowAction::AlertOperator => {
                    self.chat.send_message(operator, &operator_unconfirmed_alert(order)).await
                }
                FlowAction::ReportUnconfirmedOrder => match notice {
                    Some(notice) => self.send_notice(reply_chat, notice).await,
                    None => continue,
                },
                _ => continue,
            };
            if let Err(error) = delivery {
                warn!(
                    event_name = "conversation.delivery_failed",
                    correlation_id = %ctx.correlation_id,
                    user_id = %session.user_id,
                    action = ?action,
                    error = %error,
                    "closing message was not delivered"
                );
            }
        }
    }

    async fn report_ledger_failure(
        &self,
        session: &Session,
        attempts: u32,
        source: &LedgerError,
        reply_chat: ChatRef,
        ctx: &EventContext,
    ) -> Result<ReplyOutcome, ConversationError> {
        error!(
            event_name = "ledger.append_failed",
            correlation_id = %ctx.correlation_id,
            user_id = %session.user_id,
            session_id = %session.session_id,
            ledger = self.ledger.backend(),
            attempts,
            error = %source,
            "order could not be recorded; dialogue returned to the phone step"
        );

        let Some(outcome) = self.release_submission(session).await else {
            return Ok(ReplyOutcome::LedgerFailed { attempts });
        };
        if outcome.has_action(&FlowAction::ReportLedgerFailure) {
            let notice = ApplicationError::Ledger(source.to_string())
                .into_interface(ctx.correlation_id.clone());
            self.send_notice(reply_chat, &notice).await?;
        }
        Ok(ReplyOutcome::LedgerFailed { attempts })
    }

    async fn send_notice(
        &self,
        chat: ChatRef,
        notice: &InterfaceError,
    ) -> Result<MessageRef, ChatClientError> {
        debug!(
            event_name = "conversation.customer_notice",
            correlation_id = notice.correlation_id(),
            notice = %notice,
            "reporting ledger outcome to the customer"
        );
        self.chat.send_message(chat, notice.user_message()).await
    }

    /// Drops a dialogue whose first prompt could not reach the customer
    /// and points them at the bot from the post's own chat.
    async fn drop_unreachable(
        &self,
        activation: &ControlActivation,
        session: &Session,
        error: &ChatClientError,
        ctx: &EventContext,
    ) {
        self.close(&session.user_id, session.session_id).await;
        warn!(
            event_name = "conversation.prompt_undeliverable",
            correlation_id = %ctx.correlation_id,
            user_id = %session.user_id,
            session_id = %session.session_id,
            error = %error,
            "quantity prompt not delivered; dialogue dropped"
        );

        let Some(post) = activation.post else {
            return;
        };
        if let Err(error) = self.chat.send_message(ChatRef(post.chat_id), OPEN_BOT_FIRST).await {
            warn!(
                event_name = "conversation.delivery_failed",
                correlation_id = %ctx.correlation_id,
                user_id = %session.user_id,
                chat_id = post.chat_id,
                error = %error,
                "open-the-bot hint was not delivered"
            );
        }
    }

    async fn append_with_retry(
        &self,
        order: &OrderRecord,
        ctx: &EventContext,
    ) -> Result<u32, ConversationError> {
        let policy = &self.settings.ledger_retry;
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.ledger.append(order).await {
                Ok(()) => return Ok(attempts),
                Err(error) if error.is_retryable() && attempts <= policy.max_retries => {
                    let delay = policy.backoff(attempts - 1);
                    warn!(
                        event_name = "ledger.append_retry",
                        correlation_id = %ctx.correlation_id,
                        user_id = %order.user_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "ledger append failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(source) => return Err(ConversationError::LedgerWrite { attempts, source }),
            }
        }
    }

    /// Moves a submitting dialogue back to the phone step, provided it is
    /// still the dialogue that was submitted.
    async fn release_submission(&self, session: &Session) -> Option<TransitionOutcome> {
        let submitted = session.session_id;
        let mut outcome = None;
        let released = self
            .sessions
            .update(&session.user_id, |current| {
                if current.session_id != submitted {
                    return Err(FlowTransitionError::InvalidTransition {
                        state: FlowState::from(current.step),
                        event: FlowEvent::LedgerFailed,
                    });
                }
                outcome = Some(self.engine.advance(
                    current,
                    &FlowEvent::LedgerFailed,
                    None,
                    Utc::now(),
                )?);
                Ok(())
            })
            .await;

        match released {
            Ok(_) => outcome,
            Err(error) => {
                debug!(
                    event_name = "conversation.release_skipped",
                    user_id = %session.user_id,
                    session_id = %submitted,
                    error = %error,
                    "submitted dialogue is no longer current"
                );
                None
            }
        }
    }

    async fn advance(
        &self,
        user_id: &UserId,
        event: FlowEvent,
        input: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(Session, TransitionOutcome), SessionStoreError> {
        let mut outcome = None;
        let session = self
            .sessions
            .update(user_id, |session| {
                outcome = Some(self.engine.advance(session, &event, input, now)?);
                Ok(())
            })
            .await?;

        match outcome {
            Some(outcome) => Ok((session, outcome)),
            None => Err(SessionStoreError::NotFound(*user_id)),
        }
    }

    async fn close(&self, user_id: &UserId, session_id: SessionId) {
        self.sessions.remove_if(user_id, |current| current.session_id == session_id).await;
    }
}
