use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use orderdesk_core::ledger::OrderLedger;
use orderdesk_telegram::{EventQueue, OrderConversation};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    pub ledger: Arc<dyn OrderLedger>,
    pub conversation: Arc<OrderConversation>,
    pub queue: Arc<EventQueue>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub ledger: HealthCheck,
    pub open_sessions: usize,
    pub active_lanes: usize,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let ledger = ledger_check(state.ledger.as_ref()).await;
    let ready = ledger.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "orderdesk-server runtime initialized".to_string(),
        },
        ledger,
        open_sessions: state.conversation.open_sessions().await,
        active_lanes: state.queue.active_lanes(),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn ledger_check(ledger: &dyn OrderLedger) -> HealthCheck {
    match ledger.readiness().await {
        Ok(()) => HealthCheck {
            status: "ready",
            detail: format!("{} ledger reachable", ledger.backend()),
        },
        Err(error) => HealthCheck {
            status: "degraded",
            detail: format!("{} ledger not ready: {error}", ledger.backend()),
        },
    }
}
