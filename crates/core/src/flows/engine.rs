use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::session::{Session, SessionStep};
use crate::flows::states::{FlowAction, FlowEvent, FlowState, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> FlowState;
    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct OrderIntakeFlow;

impl FlowDefinition for OrderIntakeFlow {
    fn initial_state(&self) -> FlowState {
        FlowState::Idle
    }

    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_order_intake(current, event)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> FlowState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &FlowState,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event)
    }

    /// Applies `event` to a stored session: captures `input` where the
    /// transition asks for it and moves the session to the next step.
    /// On error the session is left untouched.
    pub fn advance(
        &self,
        session: &mut Session,
        event: &FlowEvent,
        input: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        let outcome = self.apply(&FlowState::from(session.step), event)?;

        let needs_input = outcome.has_action(&FlowAction::CaptureQuantity)
            || outcome.has_action(&FlowAction::CapturePhone);
        if needs_input && input.is_none() {
            return Err(FlowTransitionError::MissingInput { event: event.clone() });
        }

        for action in &outcome.actions {
            match action {
                FlowAction::CaptureQuantity => session.quantity = input.map(str::to_owned),
                FlowAction::CapturePhone => session.phone = input.map(str::to_owned),
                FlowAction::DiscardPhone => session.phone = None,
                _ => {}
            }
        }
        if let Some(step) = SessionStep::from_flow_state(&outcome.to) {
            session.step = step;
        }
        session.updated_at = now;

        Ok(outcome)
    }
}

impl Default for FlowEngine<OrderIntakeFlow> {
    fn default() -> Self {
        Self::new(OrderIntakeFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("no open dialogue for event {event:?}")]
    NoOpenDialogue { event: FlowEvent },
    #[error("event {event:?} requires reply text")]
    MissingInput { event: FlowEvent },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: FlowState, event: FlowEvent },
}

fn transition_order_intake(
    current: &FlowState,
    event: &FlowEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{
        AcknowledgeControl, AlertOperator, AppendOrder, CapturePhone, CaptureQuantity,
        CloseSession, ConfirmCancel, ConfirmOrder, DiscardPhone, NotifyOperator, OpenSession,
        PromptForPhone, PromptForQuantity, ReportLedgerFailure, ReportUnconfirmedOrder,
    };
    use FlowEvent::{
        CancelRequested, LedgerAppended, LedgerFailed, LedgerUnconfirmed, ReplyReceived,
        SessionExpired, StartOrder,
    };
    use FlowState::{Abandoned, AwaitingPhone, AwaitingQuantity, Idle, Submitting, Unconfirmed};

    let (to, actions) = match (current, event) {
        (_, StartOrder) => {
            (AwaitingQuantity, vec![AcknowledgeControl, OpenSession, PromptForQuantity])
        }
        (AwaitingQuantity, ReplyReceived) => (AwaitingPhone, vec![CaptureQuantity, PromptForPhone]),
        (AwaitingPhone, ReplyReceived) => (Submitting, vec![CapturePhone, AppendOrder]),
        (Submitting, LedgerAppended) => {
            (FlowState::Committed, vec![CloseSession, ConfirmOrder, NotifyOperator])
        }
        (Submitting, LedgerFailed) => (AwaitingPhone, vec![DiscardPhone, ReportLedgerFailure]),
        (Submitting, LedgerUnconfirmed) => {
            (Unconfirmed, vec![CloseSession, AlertOperator, ReportUnconfirmedOrder])
        }
        (AwaitingQuantity, CancelRequested) | (AwaitingPhone, CancelRequested) => {
            (Abandoned, vec![CloseSession, ConfirmCancel])
        }
        (AwaitingQuantity, SessionExpired) | (AwaitingPhone, SessionExpired) => {
            (Abandoned, vec![CloseSession])
        }
        (Idle, _) => {
            return Err(FlowTransitionError::NoOpenDialogue { event: event.clone() });
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: current.clone(),
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
}
