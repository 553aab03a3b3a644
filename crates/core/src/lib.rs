pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod ledger;
pub mod retry;
pub mod sessions;

pub use config::{AppConfig, ConfigError, LedgerBackend, LoadOptions, LogFormat};
pub use domain::order::{OrderRecord, OrderStatus, Sender, UserId};
pub use domain::session::{describe_product, Session, SessionId, SessionStep};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{
    FlowAction, FlowEngine, FlowEvent, FlowState, FlowTransitionError, OrderIntakeFlow,
    TransitionOutcome,
};
pub use ledger::{LedgerError, OrderLedger};
pub use retry::RetryPolicy;
pub use sessions::{SessionStore, SessionStoreError};
