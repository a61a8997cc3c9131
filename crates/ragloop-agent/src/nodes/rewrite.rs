use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::TextGenerator;
use ragloop_core::types::ConversationTurn;

use super::{collapse_whitespace, truncate_chars};
use crate::graph::{Node, NodeContext, RagState, StateUpdate};

/// Queries produced per rewrite.
pub const QUERIES_PER_REWRITE: usize = 2;

const INSTRUCTIONS: &str = "You rewrite the user's last question into 2 search-friendly queries. \
Return a JSON array of exactly 2 short strings, e.g. [\"query one\", \"query two\"]. \
No explanations.";

/// Turns the latest user question into two search queries and bumps the
/// rewrite counter.
pub struct RewriteNode {
    generator: Arc<dyn TextGenerator>,
    max_query_chars: usize,
}

impl RewriteNode {
    pub fn new(generator: Arc<dyn TextGenerator>, max_query_chars: usize) -> Self {
        Self {
            generator,
            max_query_chars,
        }
    }

    fn update_from(&self, state: &RagState, raw: &str) -> StateUpdate {
        let question = state.last_user_text().unwrap_or("").trim();
        let candidates = parse_queries(raw);
        let candidates = if candidates.is_empty() {
            vec![question.to_string()]
        } else {
            candidates
        };
        let queries = sanitize_queries(
            &candidates,
            question,
            QUERIES_PER_REWRITE,
            self.max_query_chars,
        );
        StateUpdate {
            queries: Some(queries),
            step: Some(state.step + 1),
            ..Default::default()
        }
    }
}

impl Node for RewriteNode {
    fn name(&self) -> &str {
        "rewrite"
    }

    fn execute<'a>(
        &'a self,
        state: &'a RagState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let question = state.last_user_text().unwrap_or("").trim();
            let turns = vec![
                ConversationTurn::system(INSTRUCTIONS),
                ConversationTurn::user(question),
            ];
            let raw = match ctx
                .call("rewrite.generate", self.generator.complete(turns))
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, "Query rewrite failed; using the question as-is");
                    String::new()
                }
            };
            let update = self.update_from(state, &raw);
            debug!(queries = ?update.queries, step = ?update.step, "Rewrote queries");
            Ok(update)
        })
    }

    fn fallback(&self, state: &RagState, _error: &RagError) -> StateUpdate {
        self.update_from(state, "")
    }
}

/// Pull candidate queries out of model output.
///
/// Tries, in order: the whole text as JSON (an array, or an object with a
/// `queries` array), the outermost `[...]` slice as a JSON array, and
/// finally one query per non-empty line with list markers stripped.
pub fn parse_queries(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(list) = query_list(&value) {
            return list;
        }
    }

    if let (Some(open), Some(close)) = (trimmed.find('['), trimmed.rfind(']')) {
        if open < close {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&trimmed[open..=close]) {
                return items.iter().map(value_text).collect();
            }
        }
    }

    trimmed
        .lines()
        .map(|line| line.trim_matches(|c: char| matches!(c, '-' | '•' | '*' | ' ' | '\t')))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn query_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(items.iter().map(value_text).collect()),
        Value::Object(map) => match map.get("queries") {
            Some(Value::Array(items)) => Some(items.iter().map(value_text).collect()),
            _ => None,
        },
        _ => None,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalize candidates into exactly `count` queries.
///
/// Whitespace is collapsed, blanks dropped, each query cut to `max_chars`
/// characters, and case-insensitive duplicates removed. Missing slots are
/// filled with `fallback` (or `"?"` when that is blank too).
pub fn sanitize_queries(
    candidates: &[String],
    fallback: &str,
    count: usize,
    max_chars: usize,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut queries = Vec::with_capacity(count);
    for candidate in candidates {
        let query = truncate_chars(&collapse_whitespace(candidate), max_chars);
        if query.is_empty() {
            continue;
        }
        if seen.insert(query.to_lowercase()) {
            queries.push(query);
        }
        if queries.len() == count {
            return queries;
        }
    }

    let filler = truncate_chars(&collapse_whitespace(fallback), max_chars);
    let filler = if filler.is_empty() { "?".to_string() } else { filler };
    while queries.len() < count {
        queries.push(filler.clone());
    }
    queries
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragloop_test_utils::FnGenerator;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> NodeContext {
        NodeContext::new("test", CancellationToken::new(), Duration::from_secs(5))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_strict_json_array() {
        assert_eq!(
            parse_queries(r#"["python language", "python features"]"#),
            strings(&["python language", "python features"])
        );
    }

    #[test]
    fn test_parse_queries_object_and_non_strings() {
        assert_eq!(parse_queries(r#"{"queries": ["a", 3]}"#), strings(&["a", "3"]));
    }

    #[test]
    fn test_parse_embedded_array() {
        let raw = "Sure! Here you go:\n[\"rust ownership\", \"borrow checker\"]\nHope it helps.";
        assert_eq!(
            parse_queries(raw),
            strings(&["rust ownership", "borrow checker"])
        );
    }

    #[test]
    fn test_parse_falls_back_to_lines() {
        let raw = "- first query\n\n• second query\n* third";
        assert_eq!(
            parse_queries(raw),
            strings(&["first query", "second query", "third"])
        );
        assert!(parse_queries("   ").is_empty());
    }

    #[test]
    fn test_sanitize_dedups_case_insensitively_and_pads() {
        let queries = sanitize_queries(&strings(&["Python", "python ", "  "]), "파이썬이란?", 2, 256);
        assert_eq!(queries, strings(&["Python", "파이썬이란?"]));
    }

    #[test]
    fn test_sanitize_truncates_and_caps_count() {
        let long = "x".repeat(300);
        let queries = sanitize_queries(&[long, "b".into(), "c".into()], "q", 2, 256);
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].chars().count(), 256);
        assert_eq!(queries[1], "b");
    }

    #[test]
    fn test_sanitize_blank_fallback_uses_placeholder() {
        assert_eq!(sanitize_queries(&[], "  ", 2, 256), strings(&["?", "?"]));
    }

    #[tokio::test]
    async fn test_execute_increments_step() {
        let node = RewriteNode::new(
            Arc::new(FnGenerator::fixed(r#"["python overview", "python history"]"#)),
            256,
        );
        let mut state = RagState::new(vec![ConversationTurn::user("파이썬이란?")]);
        state.step = 1;
        let update = node.execute(&state, &ctx()).await.unwrap();
        assert_eq!(update.step, Some(2));
        assert_eq!(
            update.queries,
            Some(strings(&["python overview", "python history"]))
        );
    }

    #[tokio::test]
    async fn test_generator_failure_uses_question() {
        let node = RewriteNode::new(Arc::new(FnGenerator::failing()), 256);
        let state = RagState::new(vec![ConversationTurn::user("파이썬이란?")]);
        let update = node.execute(&state, &ctx()).await.unwrap();
        assert_eq!(update.queries, Some(strings(&["파이썬이란?", "파이썬이란?"])));
        assert_eq!(update.step, Some(1));
    }

    #[test]
    fn test_fallback_without_user_turn() {
        let node = RewriteNode::new(Arc::new(FnGenerator::failing()), 256);
        let update = node.fallback(&RagState::default(), &RagError::Cancelled);
        assert_eq!(update.queries, Some(strings(&["?", "?"])));
        assert_eq!(update.step, Some(1));
    }
}
