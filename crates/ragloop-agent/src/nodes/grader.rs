use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use serde_json::{json, Value};
use tracing::{debug, warn};

use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::{ClassificationRequest, StructuredClassifier};
use ragloop_core::types::EvidenceItem;

use super::dedup_by_source;
use crate::graph::{Node, NodeContext, RagState, StateUpdate};

const INSTRUCTIONS: &str = "You judge if a candidate passage is relevant to the question. \
Return STRICT JSON with key 'relevant' (true/false).";

/// Combines KB and web evidence and drops passages judged irrelevant.
///
/// No two graded items share a source.
/// A failed or malformed judgment keeps the passage.
pub struct GraderNode {
    classifier: Option<Arc<dyn StructuredClassifier>>,
    max_evidence: usize,
}

impl GraderNode {
    pub fn new(classifier: Arc<dyn StructuredClassifier>, max_evidence: usize) -> Self {
        Self {
            classifier: Some(classifier),
            max_evidence,
        }
    }

    /// A grader that keeps every candidate.
    pub fn pass_through(max_evidence: usize) -> Self {
        Self {
            classifier: None,
            max_evidence,
        }
    }

    /// KB then web evidence, one item per source, capped at `max_evidence`.
    fn candidates(&self, state: &RagState) -> Vec<EvidenceItem> {
        let mut unique = dedup_by_source(
            state
                .kb_evidence
                .iter()
                .chain(&state.web_evidence)
                .cloned(),
        );
        unique.truncate(self.max_evidence);
        unique
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": { "relevant": { "type": "boolean" } },
            "required": ["relevant"]
        })
    }
}

impl Node for GraderNode {
    fn name(&self) -> &str {
        "grade"
    }

    fn execute<'a>(
        &'a self,
        state: &'a RagState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let candidates = self.candidates(state);
            let evidence = match &self.classifier {
                Some(classifier) if !candidates.is_empty() => {
                    let question = state.last_user_text().unwrap_or("");
                    let requests: Vec<ClassificationRequest> = candidates
                        .iter()
                        .map(|item| ClassificationRequest {
                            instructions: INSTRUCTIONS.to_string(),
                            input: json!({ "question": question, "candidate": item.content })
                                .to_string(),
                            schema: Self::schema(),
                        })
                        .collect();
                    let verdicts = join_all(
                        requests
                            .iter()
                            .map(|r| ctx.call("grader.classify", classifier.classify(r))),
                    )
                    .await;

                    candidates
                        .into_iter()
                        .zip(verdicts)
                        .filter(|(item, verdict)| match verdict {
                            Ok(value) => value
                                .get("relevant")
                                .and_then(Value::as_bool)
                                .unwrap_or(true),
                            Err(e) => {
                                warn!(source = %item.source, error = %e, "Relevance check failed; keeping passage");
                                true
                            }
                        })
                        .map(|(item, _)| item)
                        .collect()
                }
                _ => candidates,
            };
            debug!(kept = evidence.len(), "Graded evidence");
            Ok(StateUpdate {
                evidence: Some(evidence),
                ..Default::default()
            })
        })
    }

    fn fallback(&self, state: &RagState, _error: &RagError) -> StateUpdate {
        StateUpdate {
            evidence: Some(self.candidates(state)),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragloop_core::types::ConversationTurn;
    use ragloop_test_utils::FnClassifier;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> NodeContext {
        NodeContext::new("test", CancellationToken::new(), Duration::from_secs(5))
    }

    fn state() -> RagState {
        let mut state = RagState::new(vec![ConversationTurn::user("파이썬이란?")]);
        state.kb_evidence = vec![
            EvidenceItem::kb("lang.md", "Python is an interpreted language"),
            EvidenceItem::kb("cooking.md", "How to boil an egg"),
        ];
        state.web_evidence = vec![EvidenceItem::web("https://python.org", "Python home")];
        state
    }

    #[tokio::test]
    async fn test_irrelevant_passages_dropped() {
        let classifier = Arc::new(FnClassifier::new(|req| {
            Ok(json!({ "relevant": !req.input.contains("egg") }))
        }));
        let node = GraderNode::new(classifier.clone(), 6);
        let update = node.execute(&state(), &ctx()).await.unwrap();
        let sources: Vec<_> = update.evidence.unwrap().into_iter().map(|e| e.source).collect();
        assert_eq!(sources, vec!["KB:lang.md", "WEB:https://python.org"]);
        assert_eq!(classifier.calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_or_malformed_judgment_keeps_passage() {
        let node = GraderNode::new(Arc::new(FnClassifier::failing()), 6);
        let update = node.execute(&state(), &ctx()).await.unwrap();
        assert_eq!(update.evidence.unwrap().len(), 3);

        let node = GraderNode::new(Arc::new(FnClassifier::fixed(json!({"score": 0}))), 6);
        let update = node.execute(&state(), &ctx()).await.unwrap();
        assert_eq!(update.evidence.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_candidates_truncated_before_grading() {
        let classifier = Arc::new(FnClassifier::fixed(json!({"relevant": true})));
        let node = GraderNode::new(classifier.clone(), 2);
        let update = node.execute(&state(), &ctx()).await.unwrap();
        assert_eq!(update.evidence.unwrap().len(), 2);
        assert_eq!(classifier.calls(), 2);
    }

    #[tokio::test]
    async fn test_pass_through_keeps_order() {
        let node = GraderNode::pass_through(6);
        let update = node.execute(&state(), &ctx()).await.unwrap();
        let evidence = update.evidence.unwrap();
        assert_eq!(evidence[0].source, "KB:lang.md");
        assert_eq!(evidence[2].source, "WEB:https://python.org");
    }

    #[tokio::test]
    async fn test_pass_through_caps_in_order() {
        let node = GraderNode::pass_through(2);
        let update = node.execute(&state(), &ctx()).await.unwrap();
        let sources: Vec<_> = update.evidence.unwrap().into_iter().map(|e| e.source).collect();
        assert_eq!(sources, vec!["KB:lang.md", "KB:cooking.md"]);
    }

    fn state_with_repeated_sources() -> RagState {
        let mut state = RagState::new(vec![ConversationTurn::user("파이썬이란?")]);
        state.kb_evidence = vec![
            EvidenceItem::kb("lang.md", "Python is an interpreted language"),
            EvidenceItem::kb("cooking.md", "How to boil an egg"),
            EvidenceItem::kb("lang.md", "Python has dynamic typing"),
            EvidenceItem::kb("cooking.md", "How to boil an egg"),
            EvidenceItem::kb("tools.md", "pip installs packages"),
        ];
        state.web_evidence = vec![EvidenceItem::new("https://python.org", "Python home")];
        state
    }

    #[tokio::test]
    async fn test_repeated_sources_keep_last_content() {
        let classifier = Arc::new(FnClassifier::fixed(json!({"relevant": true})));
        let node = GraderNode::new(classifier.clone(), 6);
        let update = node
            .execute(&state_with_repeated_sources(), &ctx())
            .await
            .unwrap();
        let evidence = update.evidence.unwrap();
        let sources: Vec<_> = evidence.iter().map(|e| e.source.as_str()).collect();
        assert_eq!(
            sources,
            vec!["KB:lang.md", "KB:cooking.md", "KB:tools.md", "https://python.org"]
        );
        assert_eq!(evidence[0].content, "Python has dynamic typing");
        assert_eq!(classifier.calls(), 4);
    }

    #[tokio::test]
    async fn test_cap_applies_after_dedup() {
        let node = GraderNode::pass_through(3);
        let update = node
            .execute(&state_with_repeated_sources(), &ctx())
            .await
            .unwrap();
        let sources: Vec<_> = update.evidence.unwrap().into_iter().map(|e| e.source).collect();
        assert_eq!(sources, vec!["KB:lang.md", "KB:cooking.md", "KB:tools.md"]);
    }

    #[test]
    fn test_fallback_is_unfiltered() {
        let node = GraderNode::pass_through(6);
        let update = node.fallback(&state(), &RagError::Cancelled);
        assert_eq!(update.evidence.unwrap().len(), 3);
    }

    #[test]
    fn test_fallback_dedups_sources() {
        let node = GraderNode::new(Arc::new(FnClassifier::failing()), 6);
        let update = node.fallback(&state_with_repeated_sources(), &RagError::Cancelled);
        let evidence = update.evidence.unwrap();
        assert_eq!(evidence.len(), 4);
        assert_eq!(evidence[0].content, "Python has dynamic typing");
    }
}
