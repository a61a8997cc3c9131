//! Test doubles for the ragloop collaborator traits.
//!
//! Every double counts its calls so tests can assert on how often a
//! backend was reached.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde_json::Value;

use ragloop_core::config::PipelineConfig;
use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::{
    ClassificationRequest, KnowledgeBaseSearch, StructuredClassifier, TextGenerator, WebSearch,
};
use ragloop_core::types::{ConversationTurn, EvidenceItem, Role};

/// System prompt of a turn list, or "" when there is none.
pub fn system_prompt(turns: &[ConversationTurn]) -> &str {
    turns
        .iter()
        .find(|t| t.role == Role::System)
        .map(|t| t.content.as_str())
        .unwrap_or("")
}

/// A single user turn.
pub fn user_turns(text: &str) -> Vec<ConversationTurn> {
    vec![ConversationTurn::user(text)]
}

/// Pipeline config parsed from a TOML fragment, defaults for the rest.
pub fn pipeline_config(fragment: &str) -> PipelineConfig {
    toml::from_str(fragment).expect("valid pipeline config fragment")
}

type GenerateFn = dyn Fn(&[ConversationTurn]) -> Result<String> + Send + Sync;

/// Text generator answering through a closure.
pub struct FnGenerator {
    respond: Box<GenerateFn>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<ConversationTurn>>>,
}

impl FnGenerator {
    pub fn new(respond: impl Fn(&[ConversationTurn]) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with the same text.
    pub fn fixed(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Always fail with a provider error.
    pub fn failing() -> Self {
        Self::new(|_| Err(RagError::LlmRequest("generator unavailable".into())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every turn list this generator was called with.
    pub fn seen(&self) -> Vec<Vec<ConversationTurn>> {
        self.seen.lock().unwrap().clone()
    }
}

impl TextGenerator for FnGenerator {
    fn complete(&self, turns: Vec<ConversationTurn>) -> BoxFuture<'_, Result<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = (self.respond)(&turns);
        self.seen.lock().unwrap().push(turns);
        Box::pin(async move { result })
    }
}

type ClassifyFn = dyn Fn(&ClassificationRequest) -> Result<Value> + Send + Sync;

/// Structured classifier answering through a closure.
pub struct FnClassifier {
    respond: Box<ClassifyFn>,
    calls: AtomicUsize,
}

impl FnClassifier {
    pub fn new(
        respond: impl Fn(&ClassificationRequest) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answer with the same object.
    pub fn fixed(value: Value) -> Self {
        Self::new(move |_| Ok(value.clone()))
    }

    pub fn failing() -> Self {
        Self::new(|_| Err(RagError::LlmParse("classifier returned prose".into())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StructuredClassifier for FnClassifier {
    fn classify<'a>(&'a self, request: &'a ClassificationRequest) -> BoxFuture<'a, Result<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = (self.respond)(request);
        Box::pin(async move { result })
    }
}

/// Search backend returning a fixed item list for every query.
pub struct StaticSearch {
    items: Vec<EvidenceItem>,
    fail: bool,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl StaticSearch {
    pub fn new(items: Vec<EvidenceItem>) -> Self {
        Self {
            items,
            fail: false,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::empty()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn search(&self, text: &str, k: usize) -> BoxFuture<'_, Result<Vec<EvidenceItem>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(text.to_string());
        let result = if self.fail {
            Err(RagError::retrieval("static", "backend down"))
        } else {
            Ok(self.items.iter().take(k).cloned().collect())
        };
        Box::pin(async move { result })
    }
}

impl KnowledgeBaseSearch for StaticSearch {
    fn query<'a>(&'a self, text: &'a str, k: usize) -> BoxFuture<'a, Result<Vec<EvidenceItem>>> {
        self.search(text, k)
    }
}

impl WebSearch for StaticSearch {
    fn query<'a>(&'a self, text: &'a str, k: usize) -> BoxFuture<'a, Result<Vec<EvidenceItem>>> {
        self.search(text, k)
    }
}

/// Collaborator whose calls never complete.
#[derive(Default)]
pub struct Hanging {
    calls: AtomicUsize,
}

impl Hanging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn pending<T: Send + 'static>(&self) -> BoxFuture<'_, Result<T>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(futures::future::pending())
    }
}

impl TextGenerator for Hanging {
    fn complete(&self, _turns: Vec<ConversationTurn>) -> BoxFuture<'_, Result<String>> {
        self.pending()
    }
}

impl StructuredClassifier for Hanging {
    fn classify<'a>(&'a self, _request: &'a ClassificationRequest) -> BoxFuture<'a, Result<Value>> {
        self.pending()
    }
}

impl KnowledgeBaseSearch for Hanging {
    fn query<'a>(&'a self, _text: &'a str, _k: usize) -> BoxFuture<'a, Result<Vec<EvidenceItem>>> {
        self.pending()
    }
}

impl WebSearch for Hanging {
    fn query<'a>(&'a self, _text: &'a str, _k: usize) -> BoxFuture<'a, Result<Vec<EvidenceItem>>> {
        self.pending()
    }
}
