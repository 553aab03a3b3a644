use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    /// No session stored for the user.
    Idle,
    AwaitingQuantity,
    AwaitingPhone,
    Submitting,
    Committed,
    /// Ledger outcome unknown; handed to the operator.
    Unconfirmed,
    Abandoned,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Unconfirmed | Self::Abandoned)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    StartOrder,
    ReplyReceived,
    LedgerAppended,
    LedgerFailed,
    LedgerUnconfirmed,
    CancelRequested,
    SessionExpired,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    AcknowledgeControl,
    OpenSession,
    PromptForQuantity,
    CaptureQuantity,
    PromptForPhone,
    CapturePhone,
    AppendOrder,
    CloseSession,
    ConfirmOrder,
    NotifyOperator,
    DiscardPhone,
    ReportLedgerFailure,
    AlertOperator,
    ReportUnconfirmedOrder,
    ConfirmCancel,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: FlowState,
    pub to: FlowState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}

impl TransitionOutcome {
    pub fn has_action(&self, action: &FlowAction) -> bool {
        self.actions.contains(action)
    }
}
