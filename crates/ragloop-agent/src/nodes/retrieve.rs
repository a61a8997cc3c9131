use std::collections::HashSet;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use tracing::{debug, warn};

use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::{KnowledgeBaseSearch, WebSearch};
use ragloop_core::types::{EvidenceItem, SourceKind};

use crate::graph::{Node, NodeContext, RagState, StateUpdate};

/// Searches the knowledge base with every query so far.
pub struct KbRetrieverNode {
    kb: Arc<dyn KnowledgeBaseSearch>,
    top_k: usize,
}

impl KbRetrieverNode {
    pub fn new(kb: Arc<dyn KnowledgeBaseSearch>, top_k: usize) -> Self {
        Self { kb, top_k }
    }
}

impl Node for KbRetrieverNode {
    fn name(&self) -> &str {
        "retrieve_kb"
    }

    fn execute<'a>(
        &'a self,
        state: &'a RagState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let results = join_all(
                state
                    .queries
                    .iter()
                    .map(|q| ctx.call("kb.query", self.kb.query(q, self.top_k))),
            )
            .await;
            let items = collect_evidence(&state.queries, results, SourceKind::Kb);
            debug!(count = items.len(), "KB retrieval done");
            Ok(StateUpdate {
                kb_evidence: Some(items),
                ..Default::default()
            })
        })
    }

    fn fallback(&self, _state: &RagState, _error: &RagError) -> StateUpdate {
        StateUpdate::default()
    }
}

/// Searches the web, but only when the run asked for it.
pub struct WebRetrieverNode {
    web: Option<Arc<dyn WebSearch>>,
    top_k: usize,
}

impl WebRetrieverNode {
    pub fn new(web: Option<Arc<dyn WebSearch>>, top_k: usize) -> Self {
        Self { web, top_k }
    }
}

impl Node for WebRetrieverNode {
    fn name(&self) -> &str {
        "retrieve_web"
    }

    fn execute<'a>(
        &'a self,
        state: &'a RagState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            if !state.need_web {
                return Ok(StateUpdate::default());
            }
            let Some(web) = &self.web else {
                debug!("Web search requested but no provider is configured");
                return Ok(StateUpdate::default());
            };
            let results = join_all(
                state
                    .queries
                    .iter()
                    .map(|q| ctx.call("web.query", web.query(q, self.top_k))),
            )
            .await;
            let items = collect_evidence(&state.queries, results, SourceKind::Web);
            debug!(count = items.len(), "Web retrieval done");
            Ok(StateUpdate {
                web_evidence: Some(items),
                ..Default::default()
            })
        })
    }

    fn fallback(&self, _state: &RagState, _error: &RagError) -> StateUpdate {
        StateUpdate::default()
    }
}

/// Flatten per-query results in query order.
///
/// Failed queries are logged and contribute nothing. Sources get the kind
/// prefix when missing, items without a source are dropped, and repeated
/// content keeps only its first occurrence.
fn collect_evidence(
    queries: &[String],
    results: Vec<Result<Vec<EvidenceItem>>>,
    kind: SourceKind,
) -> Vec<EvidenceItem> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for (query, result) in queries.iter().zip(results) {
        match result {
            Ok(found) => {
                for item in found {
                    let Some(item) = tag_source(item, kind) else {
                        continue;
                    };
                    if seen.insert(item.content.clone()) {
                        items.push(item);
                    }
                }
            }
            Err(e) => {
                warn!(backend = kind.tag(), query = %query, error = %e, "Retrieval failed for query");
            }
        }
    }
    items
}

fn tag_source(mut item: EvidenceItem, kind: SourceKind) -> Option<EvidenceItem> {
    let source = item.source.trim();
    if source.is_empty() || source == "KB:" || source == "WEB:" {
        return None;
    }
    item.source = if source.starts_with("KB:") || source.starts_with("WEB:") {
        source.to_string()
    } else {
        format!("{}{}", kind.prefix(), source)
    };
    Some(item)
}
