use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// Per-request knobs for a chat provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatOptions {
    /// Ask the provider to return a single JSON object.
    pub json_mode: bool,
}

/// Provider-level streaming chat.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        turns: Vec<ConversationTurn>,
        options: ChatOptions,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Free-text generation over a conversation.
pub trait TextGenerator: Send + Sync + 'static {
    fn complete(&self, turns: Vec<ConversationTurn>) -> BoxFuture<'_, Result<String>>;
}

/// A classification call whose answer must follow a JSON schema.
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    /// What to judge and how.
    pub instructions: String,
    /// The text being judged.
    pub input: String,
    /// JSON Schema of the expected answer object.
    pub schema: serde_json::Value,
}

/// Structured classification returning a JSON object shaped by the schema.
pub trait StructuredClassifier: Send + Sync + 'static {
    fn classify<'a>(
        &'a self,
        request: &'a ClassificationRequest,
    ) -> BoxFuture<'a, Result<serde_json::Value>>;
}

/// Internal document search returning `KB:`-tagged evidence.
pub trait KnowledgeBaseSearch: Send + Sync + 'static {
    fn query<'a>(&'a self, text: &'a str, k: usize) -> BoxFuture<'a, Result<Vec<EvidenceItem>>>;
}

/// Web search returning `WEB:`-tagged evidence.
pub trait WebSearch: Send + Sync + 'static {
    fn query<'a>(&'a self, text: &'a str, k: usize) -> BoxFuture<'a, Result<Vec<EvidenceItem>>>;
}
