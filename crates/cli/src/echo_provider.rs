//! A minimal, non-networked [`Provider`] used when no concrete backend is
//! wired in. The Model Provider contract is a collaborator boundary the
//! runtime core deliberately doesn't implement (see DESIGN.md); this gives
//! the CLI something runnable out of the box for manual testing, in the
//! same "plain struct implementing the trait" shape as
//! `atrium_provider::mock::MockProvider`.

use atrium_provider::{ChatRequest, ChatRole, ChunkStream, ContentBlock, Provider, ProviderError, StopReason, StreamChunk};

pub struct EchoProvider {
    name: String,
}

impl EchoProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait::async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChunkStream, ProviderError> {
        let last_user_text = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| {
                m.content
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();

        let reply = format!("(echo) {last_user_text}");
        let chunks = vec![
            StreamChunk::TextDelta { text: reply },
            StreamChunk::MessageStop { reason: StopReason::EndTurn, usage: None },
        ];
        Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
    }
}
