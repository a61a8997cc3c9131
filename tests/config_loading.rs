use std::io::Write;

use ragloop_core::config::AppConfig;
use ragloop_core::error::RagError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[model]
provider = "azure"
model_id = "gpt-4o-mini"
api_key = "az-test-key"
azure_resource = "contoso"
azure_deployment = "chat"
max_tokens = 2048
temperature = 0.2

[model.retry]
max_retries = 4

[[fallback_models]]
provider = "ollama"
model_id = "llama3.2"
base_url = "http://localhost:11434/v1"

[pipeline]
use_grader_classifier = false
default_max_steps = 2
kb_top_k = 3
call_timeout_secs = 10

[knowledge_base]
db_path = "/tmp/ragloop-test/kb.sqlite"
docs_dir = "docs"
chunk_size = 256

[web_search]
api_key = "tvly-test"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.provider, "azure");
    assert_eq!(config.model.azure_deployment.as_deref(), Some("chat"));
    assert_eq!(config.model.max_tokens, 2048);
    assert_eq!(config.model.retry.as_ref().map(|r| r.max_retries), Some(4));

    assert_eq!(config.fallback_models.len(), 1);
    assert_eq!(config.fallback_models[0].provider, "ollama");

    assert!(!config.pipeline.use_grader_classifier);
    assert!(!config.pipeline.faithfulness_judge_enabled());
    assert_eq!(config.pipeline.resolve_max_steps(None), 2);
    assert_eq!(config.pipeline.kb_top_k, 3);
    assert_eq!(config.pipeline.call_timeout_secs, 10);
    assert_eq!(config.pipeline.node_timeout_secs, 120);

    assert_eq!(config.knowledge_base.chunk_size, 256);
    assert_eq!(config.knowledge_base.chunk_overlap, 50);
    assert_eq!(
        config.knowledge_base.db_path(),
        std::path::PathBuf::from("/tmp/ragloop-test/kb.sqlite")
    );

    let web = config.web_search.expect("web search present");
    assert_eq!(web.provider, "tavily");
    assert_eq!(web.api_key, "tvly-test");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("RAGLOOP_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[model]
model_id = "gpt-4o-mini"
api_key = "${RAGLOOP_TEST_API_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.model.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("RAGLOOP_TEST_API_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let toml_content = r#"
[model]
model_id = "llama3.2"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.provider, "openai");
    assert!(config.fallback_models.is_empty());
    assert!(config.web_search.is_none());
    assert!(config.pipeline.use_router_classifier);
    assert!(config.pipeline.faithfulness_judge_enabled());
    assert_eq!(config.pipeline.resolve_max_steps(None), 3);
    assert_eq!(config.pipeline.max_evidence, 6);
    assert_eq!(config.pipeline.max_supersteps, 64);
    assert_eq!(config.knowledge_base.extensions, vec!["md"]);
}

#[test]
fn test_missing_file_is_config_not_found() {
    let result = AppConfig::load(std::path::Path::new("/nonexistent/ragloop.toml"));
    assert!(matches!(result, Err(RagError::ConfigNotFound(_))));
}
