use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::{ClassificationRequest, StructuredClassifier};
use ragloop_core::types::{EvidenceItem, Faithfulness, FaithfulnessHeuristics};

use super::truncate_chars;
use crate::graph::{Node, NodeContext, RagState, StateUpdate};

const JUDGE_INSTRUCTIONS: &str = "You are a strict FAITHFULNESS judge. Given an answer and its \
evidence, decide whether every claim in the answer is supported by the evidence and carries a \
matching citation. Return STRICT JSON with keys faithful (true/false), issues (list of short \
strings) and fixed_answer (a corrected, fully cited answer, or an empty string).";

const JUDGE_EVIDENCE_ITEMS: usize = 12;
const JUDGE_SNIPPET_CHARS: usize = 600;
const MAX_REPORTED_SOURCES: usize = 20;

const HEURISTIC_ISSUE: &str = "Insufficient or mismatched citations against evidence";
const JUDGE_FAILED_ISSUE: &str = "LLM validation failed; heuristic used";

fn citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(KB|WEB):([^\]]+)\]").expect("citation pattern is valid"))
}

/// Citations in `answer`, in order, as `TAG:ref` with the ref trimmed.
pub fn extract_citations(answer: &str) -> Vec<String> {
    citation_regex()
        .captures_iter(answer)
        .map(|c| format!("{}:{}", &c[1], c[2].trim()))
        .collect()
}

/// Whether a `TAG:ref` citation points at one of the evidence sources.
///
/// A citation matches a source that equals it, or whose text contains the
/// bare reference.
fn citation_supported(citation: &str, sources: &[String]) -> bool {
    let reference = citation
        .split_once(':')
        .map(|(_, r)| r)
        .unwrap_or_default();
    sources
        .iter()
        .any(|s| s == citation || (!reference.is_empty() && s.contains(reference)))
}

/// Compute citation heuristics and the heuristic verdict.
///
/// The answer passes when there is evidence, it cites at least once, and
/// at least one citation and at least half of all citations resolve.
pub fn check_heuristics(answer: &str, evidence: &[EvidenceItem]) -> (bool, FaithfulnessHeuristics) {
    let citations = extract_citations(answer);
    let sources: Vec<String> = evidence.iter().map(EvidenceItem::normalized_source).collect();
    let supported = citations
        .iter()
        .filter(|c| citation_supported(c, &sources))
        .count();

    let has_evidence = !evidence.is_empty();
    let faithful = has_evidence
        && !citations.is_empty()
        && supported >= 1
        && supported * 2 >= citations.len();

    let heuristics = FaithfulnessHeuristics {
        has_evidence,
        citations,
        evidence_sources: sources.into_iter().take(MAX_REPORTED_SOURCES).collect(),
        supported_citations: supported,
    };
    (faithful, heuristics)
}

#[derive(Debug, Deserialize)]
struct JudgeVerdict {
    #[serde(default = "default_faithful")]
    faithful: bool,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    fixed_answer: Option<String>,
}

fn default_faithful() -> bool {
    true
}

/// Judges whether the answer is grounded in the evidence and may replace
/// an unfaithful answer with the judge's corrected one.
pub struct FaithfulnessNode {
    judge: Option<Arc<dyn StructuredClassifier>>,
}

impl FaithfulnessNode {
    pub fn new(judge: Arc<dyn StructuredClassifier>) -> Self {
        Self { judge: Some(judge) }
    }

    /// Citation heuristics only.
    pub fn heuristic() -> Self {
        Self { judge: None }
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "faithful": { "type": "boolean" },
                "issues": { "type": "array", "items": { "type": "string" } },
                "fixed_answer": { "type": "string" }
            },
            "required": ["faithful", "issues", "fixed_answer"]
        })
    }

    fn judge_input(answer: &str, evidence: &[EvidenceItem]) -> String {
        let listing = if evidence.is_empty() {
            "(none)".to_string()
        } else {
            evidence
                .iter()
                .take(JUDGE_EVIDENCE_ITEMS)
                .map(|e| {
                    format!(
                        "- {}: {}",
                        e.normalized_source(),
                        truncate_chars(&e.content, JUDGE_SNIPPET_CHARS)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        json!({ "answer": answer, "evidence": listing }).to_string()
    }

    fn heuristic_update(state: &RagState, issue: &str) -> StateUpdate {
        let answer = state.answer.as_deref().unwrap_or("").trim();
        let (faithful, heuristics) = check_heuristics(answer, &state.evidence);
        let issues = if faithful {
            vec![]
        } else {
            vec![issue.to_string()]
        };
        StateUpdate {
            faithfulness: Some(Faithfulness {
                faithful,
                issues,
                heuristics,
            }),
            ..Default::default()
        }
    }
}

impl Node for FaithfulnessNode {
    fn name(&self) -> &str {
        "check_faithfulness"
    }

    fn execute<'a>(
        &'a self,
        state: &'a RagState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let Some(judge) = &self.judge else {
                return Ok(Self::heuristic_update(state, HEURISTIC_ISSUE));
            };

            let answer = state.answer.as_deref().unwrap_or("").trim();
            let (_, heuristics) = check_heuristics(answer, &state.evidence);
            let request = ClassificationRequest {
                instructions: JUDGE_INSTRUCTIONS.to_string(),
                input: Self::judge_input(answer, &state.evidence),
                schema: Self::schema(),
            };
            let value = ctx
                .call("faithfulness.judge", judge.classify(&request))
                .await?;
            let verdict: JudgeVerdict = serde_json::from_value(value)
                .map_err(|e| RagError::LlmParse(format!("faithfulness verdict: {e}")))?;
            debug!(faithful = verdict.faithful, issues = verdict.issues.len(), "Judged answer");

            let replacement = verdict
                .fixed_answer
                .map(|a| a.trim().to_string())
                .filter(|a| !verdict.faithful && !a.is_empty());
            Ok(StateUpdate {
                answer: replacement,
                faithfulness: Some(Faithfulness {
                    faithful: verdict.faithful,
                    issues: verdict.issues,
                    heuristics,
                }),
                ..Default::default()
            })
        })
    }

    fn fallback(&self, state: &RagState, _error: &RagError) -> StateUpdate {
        let issue = if self.judge.is_some() {
            JUDGE_FAILED_ISSUE
        } else {
            HEURISTIC_ISSUE
        };
        Self::heuristic_update(state, issue)
    }
}
