use std::sync::Arc;
use std::time::Duration;

use orderdesk_core::config::AppConfig;
use orderdesk_core::ledger::OrderLedger;
use orderdesk_core::sessions::SessionStore;
use orderdesk_ledger::{open_ledger, LedgerSetupError};
use orderdesk_telegram::{
    order_dispatcher, BotApiClient, ChatClient, ChatClientError, ConversationSettings,
    EventQueue, OrderConversation,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub ledger: Arc<dyn OrderLedger>,
    pub conversation: Arc<OrderConversation>,
    pub queue: Arc<EventQueue>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Ledger(#[from] LedgerSetupError),
    #[error("telegram client setup failed: {0}")]
    ChatClient(#[source] ChatClientError),
}

pub fn bot_api_client(config: &AppConfig) -> Result<Arc<BotApiClient>, BootstrapError> {
    BotApiClient::new(
        &config.telegram.api_base_url,
        &config.telegram.bot_token,
        Duration::from_secs(config.telegram.request_timeout_secs),
    )
    .map(Arc::new)
    .map_err(BootstrapError::ChatClient)
}

/// Wires ledger, session store, conversation engine, dispatcher and lanes.
pub async fn bootstrap_with_config(
    config: AppConfig,
    chat: Arc<dyn ChatClient>,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        ledger_backend = ?config.ledger.backend,
        "starting application bootstrap"
    );

    let ledger = open_ledger(&config.ledger).await?;
    let sessions = Arc::new(SessionStore::new());
    let conversation = Arc::new(OrderConversation::new(
        sessions,
        chat.clone(),
        ledger.clone(),
        ConversationSettings::from_config(&config),
    ));
    let dispatcher = Arc::new(order_dispatcher(conversation.clone(), chat));
    let queue = Arc::new(EventQueue::new(
        dispatcher,
        Duration::from_secs(config.server.lane_idle_secs),
    ));

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        ledger_backend = ledger.backend(),
        "application wired"
    );

    Ok(Application { config, ledger, conversation, queue })
}
