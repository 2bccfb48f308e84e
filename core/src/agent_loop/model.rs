use agent_protocol::Message;
use agent_protocol::StreamEvent;
use async_channel::Sender;
use async_trait::async_trait;
use serde_json::Value;

/// Token accounting returned alongside a completion (§6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// One model turn: an assistant `Message` (possibly carrying tool calls)
/// plus usage accounting.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub message: Message,
    pub usage: Usage,
}

/// External contract a language-model adapter fulfils (§6). Implementations
/// must be safe for concurrent use across sessions; `complete_stream` has a
/// default that synthesizes start/stop framing around `complete` so a
/// non-streaming adapter needs only one method.
#[async_trait]
pub trait Model: Send + Sync {
    async fn complete(&self, history: &[Message], tool_schemas: &[Value]) -> Result<ModelResponse, String>;

    async fn complete_stream(
        &self,
        history: &[Message],
        tool_schemas: &[Value],
        events: &Sender<StreamEvent>,
    ) -> Result<ModelResponse, String> {
        let _ = events
            .send(StreamEvent::MessageStart {
                role: agent_protocol::Role::Assistant,
            })
            .await;
        let response = self.complete(history, tool_schemas).await?;
        let _ = events
            .send(StreamEvent::ContentBlockDelta {
                text: response.message.content.clone(),
            })
            .await;
        let _ = events.send(StreamEvent::MessageStop).await;
        Ok(response)
    }
}
