use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ragloop_core::config::ModelConfig;
use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::{ChatOptions, LlmClient};
use ragloop_core::types::*;

use crate::streaming::{SseEvent, SseStream};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
pub(crate) struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<OaiMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct OaiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
pub(crate) struct ResponseFormat {
    r#type: &'static str,
}

// Response types
#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDeltaContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub(crate) fn convert_turns(turns: Vec<ConversationTurn>) -> Vec<OaiMessage> {
    turns
        .into_iter()
        .map(|t| OaiMessage {
            role: t.role.as_str(),
            content: t.content,
        })
        .collect()
}

/// Build the request body shared by the OpenAI and Azure endpoints.
/// Azure addresses the model through its deployment, so `model` is optional.
pub(crate) fn build_request(
    config: &ModelConfig,
    model: Option<String>,
    turns: Vec<ConversationTurn>,
    options: ChatOptions,
) -> ChatRequest {
    ChatRequest {
        model,
        messages: convert_turns(turns),
        max_tokens: config.max_tokens,
        temperature: if config.temperature > 0.0 {
            Some(config.temperature)
        } else {
            None
        },
        stream: true,
        response_format: options.json_mode.then_some(ResponseFormat {
            r#type: "json_object",
        }),
    }
}

pub(crate) fn parse_chunk(event: SseEvent) -> Vec<Result<StreamDelta>> {
    if event.data.trim() == "[DONE]" {
        return vec![];
    }

    let parsed: std::result::Result<StreamChunk, _> = serde_json::from_str(&event.data);
    match parsed {
        Ok(chunk) => {
            let mut deltas = Vec::new();

            if let Some(usage) = chunk.usage {
                deltas.push(Ok(StreamDelta::Usage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                }));
            }

            // Azure sends a leading chunk with empty choices (prompt filter results)
            let choice = match chunk.choices.into_iter().next() {
                Some(c) => c,
                None => return deltas,
            };

            if let Some(text) = choice.delta.and_then(|d| d.content) {
                if !text.is_empty() {
                    deltas.push(Ok(StreamDelta::TextDelta(text)));
                }
            }

            if let Some(reason) = choice.finish_reason {
                let stop = match reason.as_str() {
                    "length" => StopReason::MaxTokens,
                    "content_filter" => StopReason::ContentFilter,
                    _ => StopReason::EndTurn,
                };
                deltas.push(Ok(StreamDelta::Stop(stop)));
            }

            deltas
        }
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse OpenAI SSE chunk");
            vec![]
        }
    }
}

/// Turn a successful streaming response into a delta stream.
pub(crate) fn delta_stream<'a>(response: reqwest::Response) -> BoxStream<'a, Result<StreamDelta>> {
    let sse_stream = SseStream::new(response.bytes_stream());
    let stream = sse_stream
        .map(|event| match event {
            Ok(event) => futures::stream::iter(parse_chunk(event)),
            Err(e) => futures::stream::iter(vec![Err(e)]),
        })
        .flatten();
    Box::pin(stream)
}

/// Map a non-2xx response to an `LlmRequest` error carrying status and body.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    Err(RagError::LlmRequest(format!("HTTP {}: {}", status, body)))
}

impl LlmClient for OpenAiClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        turns: Vec<ConversationTurn>,
        options: ChatOptions,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);
            let body = build_request(&config, Some(config.model_id.clone()), turns, options);
            debug!(model = %config.model_id, json_mode = options.json_mode, "OpenAI chat request");

            let mut req = self.http.post(url).json(&body);

            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            for (k, v) in &config.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .send()
                .await
                .map_err(|e| RagError::LlmRequest(e.to_string()))?;
            let response = check_status(response).await?;

            Ok(delta_stream(response))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_parse_text_chunk() {
        let deltas = parse_chunk(event(
            r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#,
        ));
        assert_eq!(deltas.len(), 1);
        assert!(matches!(&deltas[0], Ok(StreamDelta::TextDelta(t)) if t == "Hel"));
    }

    #[test]
    fn test_parse_finish_reason() {
        let deltas = parse_chunk(event(
            r#"{"choices":[{"delta":{},"finish_reason":"length"}]}"#,
        ));
        assert!(matches!(
            &deltas[0],
            Ok(StreamDelta::Stop(StopReason::MaxTokens))
        ));
    }

    #[test]
    fn test_parse_done_and_garbage() {
        assert!(parse_chunk(event("[DONE]")).is_empty());
        assert!(parse_chunk(event("not json")).is_empty());
        // Azure prompt-filter preamble
        assert!(parse_chunk(event(r#"{"choices":[],"prompt_filter_results":[]}"#)).is_empty());
    }

    #[test]
    fn test_build_request_json_mode() {
        let config = ragloop_core::AppConfig::from_toml(
            "[model]\nmodel_id = \"gpt-4.1\"\ntemperature = 0.2\n",
        )
        .unwrap()
        .model;
        let body = build_request(
            &config,
            Some("gpt-4.1".into()),
            vec![ConversationTurn::system("s"), ConversationTurn::user("u")],
            ChatOptions { json_mode: true },
        );
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "gpt-4.1");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "u");
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["stream"], true);

        let plain = build_request(&config, None, vec![], ChatOptions::default());
        let value = serde_json::to_value(&plain).unwrap();
        assert!(value.get("model").is_none());
        assert!(value.get("response_format").is_none());
    }
}
