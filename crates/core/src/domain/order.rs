use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::session::Session;
use crate::errors::DomainError;

pub const LEDGER_DATE_FORMAT: &str = "%Y-%m-%d";
pub const LEDGER_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The person behind an inbound chat event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: UserId,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl Sender {
    pub fn new(id: i64, first_name: impl Into<String>) -> Self {
        Self { id: UserId(id), first_name: first_name.into(), last_name: None, username: None }
    }

    /// Full name when present, then `@username`, then the numeric id.
    pub fn display_name(&self) -> String {
        let full_name = [Some(self.first_name.as_str()), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !full_name.is_empty() {
            return full_name;
        }

        match self.username.as_deref().map(str::trim) {
            Some(username) if !username.is_empty() => format!("@{username}"),
            _ => self.id.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub date: String,
    pub user_name: String,
    pub user_id: UserId,
    pub product_descriptor: String,
    pub quantity: String,
    pub phone: String,
    pub submitted_at: String,
    pub status: OrderStatus,
}

impl OrderRecord {
    /// Builds the ledger record for a finished dialogue. Fails unless product,
    /// quantity and phone have all been captured.
    pub fn from_session(
        session: &Session,
        sender: &Sender,
        submitted_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let mut missing = Vec::new();
        if session.product_descriptor.is_empty() {
            missing.push("product_descriptor");
        }
        if session.quantity.is_none() {
            missing.push("quantity");
        }
        if session.phone.is_none() {
            missing.push("phone");
        }
        if !missing.is_empty() {
            return Err(DomainError::InvariantViolation(format!(
                "session for user {} is incomplete: missing {}",
                session.user_id,
                missing.join(", ")
            )));
        }

        Ok(Self {
            date: submitted_at.format(LEDGER_DATE_FORMAT).to_string(),
            user_name: sender.display_name(),
            user_id: session.user_id,
            product_descriptor: session.product_descriptor.clone(),
            quantity: session.quantity.clone().unwrap_or_default(),
            phone: session.phone.clone().unwrap_or_default(),
            submitted_at: submitted_at.format(LEDGER_TIMESTAMP_FORMAT).to_string(),
            status: OrderStatus::New,
        })
    }

    /// Fixed-width ledger row in column order.
    pub fn row(&self) -> [String; 8] {
        [
            self.date.clone(),
            self.user_name.clone(),
            self.user_id.to_string(),
            self.product_descriptor.clone(),
            self.quantity.clone(),
            self.phone.clone(),
            self.submitted_at.clone(),
            self.status.as_str().to_owned(),
        ]
    }
}
