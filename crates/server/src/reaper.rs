use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orderdesk_telegram::OrderConversation;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// Periodically abandons dialogues idle for longer than `ttl`.
pub fn spawn(
    conversation: Arc<OrderConversation>,
    every: Duration,
    ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep(&conversation, ttl).await;
        }
    })
}

pub async fn sweep(conversation: &OrderConversation, ttl: Duration) -> usize {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
    let expired = conversation.expire_idle(Utc::now() - ttl).await.len();
    debug!(
        event_name = "system.reaper.sweep",
        correlation_id = "reaper",
        expired,
        "idle dialogue sweep finished"
    );
    expired
}
