pub mod chat_model;
pub mod providers;
pub mod retry;
pub mod streaming;

use std::sync::Arc;

use ragloop_core::config::{AppConfig, ModelConfig};
use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::LlmClient;

pub use chat_model::{extract_json, ChatModel};
pub use providers::azure::AzureClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "azure" | "azure_openai" => Ok(Box::new(AzureClient::new())),
        // Every OpenAI-compatible server (OpenAI, Ollama, vLLM, Groq, ...)
        "openai" | "openai_compatible" | "ollama" | "vllm" | "groq" | "openrouter" => {
            Ok(Box::new(OpenAiClient::new()))
        }
        other => Err(RagError::UnsupportedProvider(other.to_string())),
    }
}

/// Build the chat model for an app config: primary client plus retries and
/// fallback models.
pub fn build_chat_model(config: &AppConfig) -> Result<ChatModel> {
    let primary = create_client(&config.model)?;
    let mut fallbacks = Vec::with_capacity(config.fallback_models.len());
    for fb in &config.fallback_models {
        fallbacks.push((fb.clone(), create_client(fb)?));
    }
    let retry = config.model.retry.clone().unwrap_or_default();
    let client = RetryingClient::new(primary, fallbacks, retry);
    Ok(ChatModel::new(Arc::new(client), config.model.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(provider: &str) -> ModelConfig {
        ragloop_core::AppConfig::from_toml(&format!(
            "[model]\nprovider = \"{provider}\"\nmodel_id = \"m\"\n"
        ))
        .unwrap()
        .model
    }

    #[test]
    fn test_create_client_known_providers() {
        assert!(create_client(&model("openai")).is_ok());
        assert!(create_client(&model("azure")).is_ok());
        assert!(create_client(&model("ollama")).is_ok());
    }

    #[test]
    fn test_create_client_unknown_provider() {
        let err = create_client(&model("carrier-pigeon")).err().unwrap();
        assert!(matches!(err, RagError::UnsupportedProvider(p) if p == "carrier-pigeon"));
    }
}
