mod bootstrap;
mod health;
mod reaper;
mod webhook;

use std::time::Duration;

use anyhow::Result;
use orderdesk_core::config::{AppConfig, LoadOptions};
use orderdesk_telegram::BotApiClient;

fn init_logging(config: &AppConfig) {
    use orderdesk_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let bot_api = bootstrap::bot_api_client(&config)?;
    let app = bootstrap::bootstrap_with_config(config, bot_api.clone()).await?;

    if app.config.webhook.register_on_startup {
        register_webhook(&app.config, &bot_api).await;
    }

    let reaper = reaper::spawn(
        app.conversation.clone(),
        Duration::from_secs(app.config.ordering.reap_interval_secs),
        Duration::from_secs(app.config.ordering.session_ttl_secs),
    );

    let routes = webhook::router(webhook::WebhookState::new(
        app.config.telegram.bot_token.clone(),
        app.queue.clone(),
    ))
    .merge(health::router(health::HealthState {
        ledger: app.ledger.clone(),
        conversation: app.conversation.clone(),
        queue: app.queue.clone(),
    }));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        ledger_backend = app.ledger.backend(),
        "orderdesk-server started"
    );
    axum::serve(listener, routes).with_graceful_shutdown(wait_for_shutdown()).await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        open_sessions = app.conversation.open_sessions().await,
        "orderdesk-server stopping"
    );

    reaper.abort();
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if !app.queue.drain(grace).await {
        tracing::warn!(
            event_name = "system.server.drain_timeout",
            correlation_id = "shutdown",
            pending_workers = app.queue.active_workers(),
            "event lanes still busy at shutdown deadline"
        );
    }

    Ok(())
}

async fn register_webhook(config: &AppConfig, bot_api: &BotApiClient) {
    let Some(url) = config.webhook_url() else {
        return;
    };
    match bot_api.set_webhook(&url).await {
        Ok(()) => tracing::info!(
            event_name = "system.webhook.registered",
            correlation_id = "bootstrap",
            "telegram webhook registered"
        ),
        Err(error) => tracing::error!(
            event_name = "system.webhook.registration_failed",
            correlation_id = "bootstrap",
            error = %error,
            "telegram webhook registration failed"
        ),
    }
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for shutdown signal"
        );
    }
}
