use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    // Retrieval errors
    #[error("Retrieval failed: {backend}: {message}")]
    Retrieval { backend: String, message: String },

    #[error("Call timed out after {timeout_secs}s: {call}")]
    CallTimeout { call: String, timeout_secs: u64 },

    // Node errors
    #[error("Node {node} failed: {message}")]
    Node { node: String, message: String },

    // Run errors
    #[error("Run cancelled")]
    Cancelled,

    #[error("Run exceeded its time budget ({0}s)")]
    RunTimeout(u64),

    // Graph construction errors
    #[error("Graph error: {0}")]
    Graph(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RagError {
    /// Shorthand for a failed retrieval call against a named backend.
    pub fn retrieval(backend: impl Into<String>, message: impl ToString) -> Self {
        Self::Retrieval {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error ends the whole run rather than a single node.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, RagError::Cancelled | RagError::RunTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
