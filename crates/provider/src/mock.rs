//! A scripted in-memory [`Provider`] for tests — a plain struct implementing
//! the trait, per the dependency-inversion design note (no mocking
//! framework needed at this seam).

use crate::chat::{ChatRequest, ChunkStream, Provider, StreamChunk};
use crate::error::ProviderError;
use parking_lot::Mutex;

/// One scripted response: a fixed sequence of chunks to yield for the next
/// `stream()` call, or an error to return instead of opening a stream.
pub enum ScriptedTurn {
    Chunks(Vec<StreamChunk>),
    Fails(fn() -> ProviderError),
}

/// Replays a queue of [`ScriptedTurn`]s, one per `stream()` call, in order.
/// Panics if the queue is exhausted — tests should script exactly as many
/// turns as they expect the loop to request.
pub struct MockProvider {
    name: String,
    turns: Mutex<std::collections::VecDeque<ScriptedTurn>>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            turns: Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn push_chunks(&self, chunks: Vec<StreamChunk>) -> &Self {
        self.turns.lock().push_back(ScriptedTurn::Chunks(chunks));
        self
    }

    pub fn push_failure(&self, make_err: fn() -> ProviderError) -> &Self {
        self.turns.lock().push_back(ScriptedTurn::Fails(make_err));
        self
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, _request: ChatRequest) -> Result<ChunkStream, ProviderError> {
        let turn = self
            .turns
            .lock()
            .pop_front()
            .expect("MockProvider: no scripted turn left");
        match turn {
            ScriptedTurn::Fails(make_err) => Err(make_err()),
            ScriptedTurn::Chunks(chunks) => {
                let stream = futures::stream::iter(chunks.into_iter().map(Ok));
                Ok(Box::pin(stream))
            }
        }
    }
}
