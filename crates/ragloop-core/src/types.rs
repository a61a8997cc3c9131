use serde::{Deserialize, Serialize};
use tracing::debug;

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Parse a role name, accepting the aliases different chat front-ends use.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Some(Role::User),
            "assistant" | "ai" => Some(Role::Assistant),
            "system" | "developer" => Some(Role::System),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single conversation turn. Content is always plain text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Flatten a raw content value into text.
///
/// Accepts a plain string or a list of parts such as
/// `[{"type": "text", "text": "..."}]`; text parts are joined with a space
/// and every other part kind is ignored.
pub fn content_to_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Normalize raw chat messages into conversation turns.
///
/// Objects carry their role under `role` (or `type`, as some SDKs emit) and
/// their content under `content`. A bare string is read as a user turn.
/// Entries with an unknown role are dropped.
pub fn normalize_turns(raw: &[serde_json::Value]) -> Vec<ConversationTurn> {
    let mut turns = Vec::with_capacity(raw.len());
    for value in raw {
        if let Some(text) = value.as_str() {
            turns.push(ConversationTurn::user(text));
            continue;
        }
        let role_name = value
            .get("role")
            .or_else(|| value.get("type"))
            .and_then(|r| r.as_str())
            .unwrap_or_default();
        match Role::parse(role_name) {
            Some(role) => {
                let content = value
                    .get("content")
                    .map(content_to_text)
                    .unwrap_or_default();
                turns.push(ConversationTurn::new(role, content));
            }
            None => debug!(role = role_name, "Dropping message with unknown role"),
        }
    }
    turns
}

/// Text of the most recent user turn, if any.
pub fn last_user_text(turns: &[ConversationTurn]) -> Option<&str> {
    turns
        .iter()
        .rev()
        .find(|t| t.role == Role::User)
        .map(|t| t.content.as_str())
}

/// Provenance kind of an evidence item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "KB")]
    Kb,
    #[serde(rename = "WEB")]
    Web,
}

impl SourceKind {
    pub fn tag(&self) -> &'static str {
        match self {
            SourceKind::Kb => "KB",
            SourceKind::Web => "WEB",
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            SourceKind::Kb => "KB:",
            SourceKind::Web => "WEB:",
        }
    }
}

/// Add the `KB:`/`WEB:` prefix to a source identifier that lacks one.
///
/// URL-like identifiers are treated as web sources, everything else as
/// knowledge-base documents.
pub fn normalize_source(source: &str) -> String {
    if source.starts_with("KB:") || source.starts_with("WEB:") {
        return source.to_string();
    }
    if source.starts_with("http://") || source.starts_with("https://") {
        format!("WEB:{source}")
    } else {
        format!("KB:{source}")
    }
}

/// A retrieved passage with a tagged provenance identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    /// `KB:<document>` or `WEB:<url>`.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
}

impl EvidenceItem {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            title: None,
            content: content.into(),
            relevance_score: None,
        }
    }

    pub fn kb(reference: &str, content: impl Into<String>) -> Self {
        Self::new(format!("KB:{reference}"), content)
    }

    pub fn web(url: &str, content: impl Into<String>) -> Self {
        Self::new(format!("WEB:{url}"), content)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.relevance_score = Some(score);
        self
    }

    /// Source identifier with the kind prefix guaranteed.
    pub fn normalized_source(&self) -> String {
        normalize_source(&self.source)
    }

    /// Split the normalized source into its kind and reference part.
    pub fn kind_and_ref(&self) -> (SourceKind, String) {
        let normalized = self.normalized_source();
        if let Some(rest) = normalized.strip_prefix("WEB:") {
            (SourceKind::Web, rest.trim().to_string())
        } else {
            let rest = normalized.strip_prefix("KB:").unwrap_or(&normalized);
            (SourceKind::Kb, rest.trim().to_string())
        }
    }
}

/// Intent of the latest user turn, as judged by the router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Followup,
    #[default]
    NewTopic,
    Ambiguous,
    Task,
}

/// Raw signals behind a heuristic faithfulness verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaithfulnessHeuristics {
    pub has_evidence: bool,
    /// Citations found in the answer, as `TAG:ref`.
    pub citations: Vec<String>,
    /// Normalized evidence sources (at most 20).
    pub evidence_sources: Vec<String>,
    pub supported_citations: usize,
}

/// Verdict on whether an answer is grounded in its evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Faithfulness {
    pub faithful: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub heuristics: FaithfulnessHeuristics,
}

/// Stop reason reported by a chat provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ContentFilter,
}

/// A streaming delta from a chat provider.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text content.
    TextDelta(String),

    /// The response is complete.
    Stop(StopReason),

    /// Usage information.
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },
}

/// Progress events emitted by the graph executor.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    RunStarted {
        run_id: String,
    },
    Superstep {
        index: usize,
        nodes: Vec<String>,
    },
    NodeStarted {
        node: String,
    },
    NodeFinished {
        node: String,
        elapsed_ms: u64,
        /// The node's fallback update was applied instead of its result.
        degraded: bool,
    },
    RunFinished {
        run_id: String,
        supersteps: usize,
        step: u32,
        faithful: Option<bool>,
    },
}
