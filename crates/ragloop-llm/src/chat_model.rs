use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use tracing::debug;

use ragloop_core::config::ModelConfig;
use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::{
    ChatOptions, ClassificationRequest, LlmClient, StructuredClassifier, TextGenerator,
};
use ragloop_core::types::*;

/// A configured chat model: a provider client bound to its model config.
///
/// Implements both [`TextGenerator`] (free text, streamed and collected) and
/// [`StructuredClassifier`] (JSON mode with the schema in the system prompt).
#[derive(Clone)]
pub struct ChatModel {
    llm: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl ChatModel {
    pub fn new(llm: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Stream a chat request and collect its text deltas.
    async fn collect_text(
        &self,
        turns: Vec<ConversationTurn>,
        options: ChatOptions,
    ) -> Result<String> {
        let mut stream = self.llm.chat_stream(&self.config, turns, options).await?;

        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            match delta? {
                StreamDelta::TextDelta(chunk) => text.push_str(&chunk),
                StreamDelta::Stop(reason) => {
                    if reason == StopReason::ContentFilter {
                        return Err(RagError::LlmRequest("response blocked by content filter".into()));
                    }
                }
                StreamDelta::Usage {
                    input_tokens,
                    output_tokens,
                } => debug!(input_tokens, output_tokens, "LLM usage"),
            }
        }
        Ok(text)
    }
}

impl TextGenerator for ChatModel {
    fn complete(&self, turns: Vec<ConversationTurn>) -> BoxFuture<'_, Result<String>> {
        Box::pin(self.collect_text(turns, ChatOptions::default()))
    }
}

impl StructuredClassifier for ChatModel {
    fn classify<'a>(
        &'a self,
        request: &'a ClassificationRequest,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move {
            let system = format!(
                "{}\n\nRespond with a single JSON object that matches this JSON Schema, and nothing else:\n{}",
                request.instructions, request.schema
            );
            let turns = vec![
                ConversationTurn::system(system),
                ConversationTurn::user(request.input.clone()),
            ];
            let text = self
                .collect_text(turns, ChatOptions { json_mode: true })
                .await?;

            let value: serde_json::Value = serde_json::from_str(extract_json(&text))
                .map_err(|e| RagError::LlmParse(format!("{e}: {}", truncate(&text, 200))))?;
            if !value.is_object() {
                return Err(RagError::LlmParse(format!(
                    "expected a JSON object, got: {}",
                    truncate(&text, 200)
                )));
            }
            Ok(value)
        })
    }
}

/// Locate the JSON payload in a model response: a fenced block if present,
/// otherwise the outermost `{...}` slice, otherwise the trimmed text.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return &trimmed[start..=end];
            }
        }
    }
    trimmed
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
