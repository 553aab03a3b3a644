pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, OrderIntakeFlow};
pub use states::{FlowAction, FlowEvent, FlowState, TransitionOutcome};
