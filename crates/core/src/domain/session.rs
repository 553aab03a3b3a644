use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::UserId;
use crate::flows::states::FlowState;

pub const UNTITLED_PRODUCT: &str = "Без назви";
pub const DEFAULT_PRODUCT_MAX_CHARS: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStep {
    AwaitingQuantity,
    AwaitingPhone,
    /// Ledger append in flight.
    Submitting,
}

impl From<SessionStep> for FlowState {
    fn from(step: SessionStep) -> Self {
        match step {
            SessionStep::AwaitingQuantity => FlowState::AwaitingQuantity,
            SessionStep::AwaitingPhone => FlowState::AwaitingPhone,
            SessionStep::Submitting => FlowState::Submitting,
        }
    }
}

impl SessionStep {
    pub fn from_flow_state(state: &FlowState) -> Option<Self> {
        match state {
            FlowState::AwaitingQuantity => Some(Self::AwaitingQuantity),
            FlowState::AwaitingPhone => Some(Self::AwaitingPhone),
            FlowState::Submitting => Some(Self::Submitting),
            FlowState::Idle
            | FlowState::Committed
            | FlowState::Unconfirmed
            | FlowState::Abandoned => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub product_descriptor: String,
    pub quantity: Option<String>,
    pub phone: Option<String>,
    pub step: SessionStep,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn open(
        user_id: UserId,
        product_descriptor: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: SessionId::generate(),
            user_id,
            product_descriptor: product_descriptor.into(),
            quantity: None,
            phone: None,
            step: SessionStep::AwaitingQuantity,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.updated_at < cutoff
    }
}

/// Caption wins over body; the result is trimmed and cut to `max_chars`
/// characters.
pub fn describe_product(caption: Option<&str>, text: Option<&str>, max_chars: usize) -> String {
    let source = [caption, text]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty());

    match source {
        Some(value) => {
            value.chars().take(max_chars.max(1)).collect::<String>().trim_end().to_owned()
        }
        None => UNTITLED_PRODUCT.to_owned(),
    }
}
