use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::client::{ChatClient, ChatClientError};
use crate::events::EventContext;
use crate::keyboard::order_keyboard;
use crate::update::BroadcastPost;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("post {message_id} in chat {chat_id} has neither caption nor text")]
    EmptyPost { chat_id: i64, message_id: i64 },
    #[error("could not attach order control: {0}")]
    EditFailed(#[from] ChatClientError),
}

/// Attaches the ordering control to broadcast posts. One attempt per post.
pub struct PostAnnotator {
    client: Arc<dyn ChatClient>,
}

impl PostAnnotator {
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        Self { client }
    }

    pub async fn annotate(
        &self,
        post: &BroadcastPost,
        ctx: &EventContext,
    ) -> Result<(), AnnotationError> {
        if !post.has_content() {
            return Err(AnnotationError::EmptyPost {
                chat_id: post.post.chat_id,
                message_id: post.post.message_id,
            });
        }

        self.client.edit_controls(&post.post, &order_keyboard()).await?;
        info!(
            event_name = "annotator.control_attached",
            correlation_id = %ctx.correlation_id,
            chat_id = post.post.chat_id,
            message_id = post.post.message_id,
            "order control attached to post"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{AnnotationError, PostAnnotator};
    use crate::client::{
        ChatAction, ChatClientError, ChatOperation, PostRef, RecordingChatClient,
    };
    use crate::events::EventContext;
    use crate::keyboard::order_keyboard;
    use crate::update::BroadcastPost;

    fn post(caption: Option<&str>, text: Option<&str>) -> BroadcastPost {
        BroadcastPost {
            post: PostRef { chat_id: -100, message_id: 5 },
            caption: caption.map(str::to_owned),
            text: text.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn annotates_post_with_single_order_button() {
        let client = Arc::new(RecordingChatClient::new());
        let annotator = PostAnnotator::new(client.clone());

        annotator
            .annotate(&post(None, Some("Круасани")), &EventContext::default())
            .await
            .expect("annotated");

        assert_eq!(
            client.actions(),
            vec![ChatAction::EditControls {
                post: PostRef { chat_id: -100, message_id: 5 },
                controls: order_keyboard(),
            }]
        );
    }

    #[tokio::test]
    async fn empty_posts_are_left_alone() {
        let client = Arc::new(RecordingChatClient::new());
        let annotator = PostAnnotator::new(client.clone());

        let result = annotator.annotate(&post(Some(" "), None), &EventContext::default()).await;

        assert_eq!(result, Err(AnnotationError::EmptyPost { chat_id: -100, message_id: 5 }));
        assert!(client.actions().is_empty());
    }

    #[tokio::test]
    async fn edit_failures_surface_as_annotation_errors() {
        let client = Arc::new(RecordingChatClient::new());
        client.fail_next(
            ChatOperation::EditControls,
            ChatClientError::Api {
                method: "editMessageReplyMarkup",
                code: 400,
                description: "message can't be edited".to_owned(),
            },
        );
        let annotator = PostAnnotator::new(client);

        let result = annotator.annotate(&post(Some("Торт"), None), &EventContext::default()).await;

        assert!(matches!(result, Err(AnnotationError::EditFailed(ChatClientError::Api { .. }))));
    }
}
