pub mod tavily;

use ragloop_core::config::WebSearchConfig;
use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::WebSearch;

pub use tavily::TavilySearch;

/// Create the web search backend named in the config.
pub fn create_web_search(config: &WebSearchConfig) -> Result<Box<dyn WebSearch>> {
    match config.provider.as_str() {
        "tavily" => {
            let mut search = TavilySearch::new(&config.api_key);
            if let Some(url) = &config.base_url {
                search = search.with_base_url(url);
            }
            Ok(Box::new(search))
        }
        other => Err(RagError::UnsupportedProvider(format!("web search: {other}"))),
    }
}
