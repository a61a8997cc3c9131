use futures::future::BoxFuture;
use futures::stream::BoxStream;
use reqwest::Client;
use tracing::debug;

use ragloop_core::config::ModelConfig;
use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::{ChatOptions, LlmClient};
use ragloop_core::types::*;

use super::openai::{build_request, check_status, delta_stream};

const DEFAULT_API_VERSION: &str = "2024-06-01";

/// Azure OpenAI client. Uses the same wire format as OpenAI but different
/// endpoint structure and `api-key` header instead of Bearer token.
pub struct AzureClient {
    http: Client,
}

impl AzureClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for AzureClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Chat completions URL for a deployment. `base_url` overrides the
/// `https://<resource>.openai.azure.com` endpoint.
fn endpoint_url(config: &ModelConfig) -> Result<String> {
    let deployment = config
        .azure_deployment
        .as_deref()
        .unwrap_or(config.model_id.as_str());
    let api_version = config
        .azure_api_version
        .as_deref()
        .unwrap_or(DEFAULT_API_VERSION);
    let endpoint = match (&config.base_url, &config.azure_resource) {
        (Some(base), _) => base.trim_end_matches('/').to_string(),
        (None, Some(resource)) => format!("https://{resource}.openai.azure.com"),
        (None, None) => {
            return Err(RagError::Config(
                "Azure: azure_resource or base_url is required".into(),
            ))
        }
    };
    Ok(format!(
        "{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={api_version}"
    ))
}

impl LlmClient for AzureClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        turns: Vec<ConversationTurn>,
        options: ChatOptions,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let url = endpoint_url(&config)?;
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| RagError::Config("Azure: api_key is required".into()))?;

            let body = build_request(&config, None, turns, options);
            debug!(url = %url, json_mode = options.json_mode, "Azure chat request");

            let response = self
                .http
                .post(&url)
                .header("api-key", api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| RagError::LlmRequest(e.to_string()))?;
            let response = check_status(response).await?;

            Ok(delta_stream(response))
        })
    }
}
