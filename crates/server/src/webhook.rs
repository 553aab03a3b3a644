use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Router,
};
use orderdesk_telegram::{decode_update, EventContext, EventQueue};
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

#[derive(Clone)]
pub struct WebhookState {
    bot_token: SecretString,
    queue: Arc<EventQueue>,
}

impl WebhookState {
    pub fn new(bot_token: SecretString, queue: Arc<EventQueue>) -> Self {
        Self { bot_token, queue }
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/webhook/{token}", post(receive_update)).with_state(state)
}

/// Acknowledges every update addressed to our token. Processing happens on
/// the event lanes after the response is sent.
pub async fn receive_update(
    State(state): State<WebhookState>,
    Path(token): Path<String>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if !token_matches(&token, state.bot_token.expose_secret()) {
        warn!(
            event_name = "ingress.telegram.unknown_token",
            correlation_id = "unknown-correlation-id",
            "webhook called with a foreign token"
        );
        return (StatusCode::NOT_FOUND, "Not Found");
    }

    let envelope = match decode_update(&body) {
        Ok(envelope) => envelope,
        Err(error) => {
            warn!(
                event_name = "ingress.telegram.malformed_update",
                correlation_id = "unknown-correlation-id",
                body_bytes = body.len(),
                error = %error,
                "dropping undecodable update"
            );
            return (StatusCode::OK, "OK");
        }
    };

    let ctx = EventContext::for_update(envelope.update_id);
    let event_type = envelope.event.event_type();
    info!(
        event_name = "ingress.telegram.update_received",
        correlation_id = %ctx.correlation_id,
        event_type = ?event_type,
        "update accepted"
    );

    if let Err(error) = state.queue.enqueue(envelope) {
        warn!(
            event_name = "ingress.telegram.queue_closed",
            correlation_id = %ctx.correlation_id,
            error = %error,
            "update arrived during shutdown and was dropped"
        );
    }

    (StatusCode::OK, "OK")
}

/// Compares every byte regardless of where the first mismatch is.
fn token_matches(presented: &str, expected: &str) -> bool {
    let (presented, expected) = (presented.as_bytes(), expected.as_bytes());
    if presented.len() != expected.len() {
        return false;
    }
    presented.iter().zip(expected).fold(0u8, |diff, (a, b)| diff | (a ^ b)) == 0
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use orderdesk_core::retry::RetryPolicy;
    use orderdesk_core::sessions::SessionStore;
    use orderdesk_ledger::InMemoryOrderLedger;
    use orderdesk_telegram::{
        order_dispatcher, ChatRef, ConversationSettings, EventQueue, OrderConversation,
        RecordingChatClient,
    };
    use tower::ServiceExt;

    use crate::webhook::{router, token_matches, WebhookState};

    const TOKEN: &str = "123456:test-secret";

    struct Harness {
        queue: Arc<EventQueue>,
        chat: Arc<RecordingChatClient>,
        state: WebhookState,
    }

    fn harness() -> Harness {
        let chat = Arc::new(RecordingChatClient::new());
        let conversation = Arc::new(OrderConversation::new(
            Arc::new(SessionStore::new()),
            chat.clone(),
            Arc::new(InMemoryOrderLedger::new()),
            ConversationSettings {
                product_max_chars: 50,
                operator_chat: ChatRef(-1),
                ledger_retry: RetryPolicy::none(),
            },
        ));
        let dispatcher = Arc::new(order_dispatcher(conversation, chat.clone()));
        let queue = Arc::new(EventQueue::new(dispatcher, Duration::from_secs(5)));
        let state = WebhookState::new(TOKEN.to_owned().into(), queue.clone());
        Harness { queue, chat, state }
    }

    fn post(path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .expect("request builds")
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), 1024).await.expect("body reads");
        String::from_utf8(bytes.to_vec()).expect("utf-8 body")
    }

    #[tokio::test]
    async fn start_command_is_acknowledged_and_answered() {
        let harness = harness();
        let update = r#"{
            "update_id": 41,
            "message": {
                "message_id": 1,
                "date": 0,
                "chat": {"id": 555, "type": "private"},
                "from": {"id": 555, "is_bot": false, "first_name": "Олена"},
                "text": "/start"
            }
        }"#;

        let response = router(harness.state.clone())
            .oneshot(post(&format!("/webhook/{TOKEN}"), update))
            .await
            .expect("router responds");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");
        assert!(harness.queue.drain(Duration::from_secs(5)).await);
        assert_eq!(harness.chat.messages_to(ChatRef(555)), ["Бот працює!"]);
    }

    #[tokio::test]
    async fn malformed_payload_still_gets_ok() {
        let harness = harness();

        let response = router(harness.state.clone())
            .oneshot(post(&format!("/webhook/{TOKEN}"), "{not json"))
            .await
            .expect("router responds");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");
        assert_eq!(harness.queue.active_lanes(), 0);
    }

    #[tokio::test]
    async fn foreign_token_is_not_found() {
        let harness = harness();

        let response = router(harness.state.clone())
            .oneshot(post("/webhook/999:other", r#"{"update_id": 1}"#))
            .await
            .expect("router responds");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(harness.chat.actions().is_empty());
    }

    #[tokio::test]
    async fn token_differing_only_in_last_byte_is_not_found() {
        let harness = harness();
        let near_miss = format!("{}X", &TOKEN[..TOKEN.len() - 1]);

        let response = router(harness.state.clone())
            .oneshot(post(&format!("/webhook/{near_miss}"), r#"{"update_id": 2}"#))
            .await
            .expect("router responds");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(harness.queue.active_lanes(), 0);
    }

    #[test]
    fn token_comparison_requires_every_byte() {
        assert!(token_matches(TOKEN, TOKEN));
        assert!(!token_matches("123456:test-secreT", TOKEN));
        assert!(!token_matches("023456:test-secret", TOKEN));
        assert!(!token_matches("123456:test", TOKEN));
        assert!(!token_matches("", TOKEN));
    }

    #[tokio::test]
    async fn closed_queue_drops_update_but_acknowledges() {
        let harness = harness();
        harness.queue.close();
        let update = r#"{
            "update_id": 42,
            "message": {
                "message_id": 2,
                "date": 0,
                "chat": {"id": 556, "type": "private"},
                "from": {"id": 556, "is_bot": false, "first_name": "Ігор"},
                "text": "/start"
            }
        }"#;

        let response = router(harness.state.clone())
            .oneshot(post(&format!("/webhook/{TOKEN}"), update))
            .await
            .expect("router responds");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(harness.chat.actions().is_empty());
    }
}
