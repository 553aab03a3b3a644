use thiserror::Error;

use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("ledger failure: {0}")]
    Ledger(String),
    #[error("ledger write unconfirmed: {0}")]
    LedgerUnconfirmed(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("awaiting operator confirmation: {message}")]
    PendingConfirmation { message: String, correlation_id: String },
}

impl InterfaceError {
    /// Customer-facing text; never includes the underlying cause.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable { .. } => {
                "На жаль, не вдалося зберегти замовлення. Надішліть, будь ласка, номер телефону ще раз."
            }
            Self::PendingConfirmation { .. } => {
                "Дякуємо! Замовлення передано менеджеру, він зв'яжеться з вами для підтвердження."
            }
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::ServiceUnavailable { correlation_id, .. }
            | Self::PendingConfirmation { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        match self {
            Self::Ledger(message) => InterfaceError::ServiceUnavailable { message, correlation_id },
            Self::LedgerUnconfirmed(message) => {
                InterfaceError::PendingConfirmation { message, correlation_id }
            }
        }
    }
}
