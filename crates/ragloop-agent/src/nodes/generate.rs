use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::TextGenerator;
use ragloop_core::types::{ConversationTurn, EvidenceItem};

use super::{collapse_whitespace, dedup_by_source, truncate_chars};
use crate::graph::{Node, NodeContext, RagState, StateUpdate};

const SYSTEM_PROMPT: &str = "당신은 제공된 근거(EVIDENCE)만으로 답하는 신중한 어시스턴트입니다.\n\
- 각 주장 바로 뒤에 [KB:참조] 또는 [WEB:참조] 형식의 인용을 붙이세요. 참조는 EVIDENCE 목록의 식별자를 그대로 쓰세요.\n\
- 근거로 뒷받침되지 않는 내용은 추측하지 말고 '근거 없음'이라고 명시하세요.\n\
- 질문과 같은 언어로 간결하게 답하세요.";

const FALLBACK_WITH_EVIDENCE: &str =
    "죄송해요, 답변 생성 중 오류가 발생했습니다. 아래는 수집된 근거입니다:\n";
const FALLBACK_NO_EVIDENCE: &str = "죄송해요, 현재는 근거 자료가 없어 확답을 드리기 어려워요.";

/// Produces a cited answer from the graded evidence.
pub struct GeneratorNode {
    generator: Arc<dyn TextGenerator>,
    max_items: usize,
    max_snippet_chars: usize,
}

impl GeneratorNode {
    pub fn new(generator: Arc<dyn TextGenerator>, max_items: usize, max_snippet_chars: usize) -> Self {
        Self {
            generator,
            max_items,
            max_snippet_chars,
        }
    }
}

impl Node for GeneratorNode {
    fn name(&self) -> &str {
        "generate"
    }

    fn execute<'a>(
        &'a self,
        state: &'a RagState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let question = state.last_user_text().unwrap_or("").trim();
            let block = build_evidence_block(&state.evidence, self.max_items, self.max_snippet_chars);
            let turns = vec![
                ConversationTurn::system(SYSTEM_PROMPT),
                ConversationTurn::user(format!("[QUESTION]\n{question}\n\n[EVIDENCE]\n{block}")),
            ];
            let answer = ctx
                .call("generate.complete", self.generator.complete(turns))
                .await?;
            debug!(chars = answer.len(), "Generated answer");
            Ok(StateUpdate {
                answer: Some(answer.trim().to_string()),
                ..Default::default()
            })
        })
    }

    fn fallback(&self, state: &RagState, _error: &RagError) -> StateUpdate {
        let answer = if state.evidence.is_empty() {
            FALLBACK_NO_EVIDENCE.to_string()
        } else {
            let block = build_evidence_block(&state.evidence, self.max_items, self.max_snippet_chars);
            format!("{FALLBACK_WITH_EVIDENCE}{block}")
        };
        StateUpdate {
            answer: Some(answer),
            ..Default::default()
        }
    }
}

/// Render evidence as prompt lines `- KIND:ref :: title :: snippet`.
///
/// Items are de-duplicated by normalized source: a later item replaces an
/// earlier one but keeps its position. At most `max_items` lines are
/// emitted. Snippets are whitespace-collapsed and, when longer than
/// `max_snippet_chars`, cut and ended with `…`. Returns `(none)` when there
/// is nothing to render.
pub fn build_evidence_block(
    evidence: &[EvidenceItem],
    max_items: usize,
    max_snippet_chars: usize,
) -> String {
    let unique = dedup_by_source(evidence.iter().cloned());

    let lines: Vec<String> = unique
        .into_iter()
        .take(max_items)
        .map(|item| {
            let (kind, reference) = item.kind_and_ref();
            let title = item
                .title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(&reference);
            let snippet = clip_snippet(&item.content, max_snippet_chars);
            format!("- {}:{} :: {} :: {}", kind.tag(), reference, title, snippet)
        })
        .collect();

    if lines.is_empty() {
        "(none)".to_string()
    } else {
        lines.join("\n")
    }
}

fn clip_snippet(content: &str, max_chars: usize) -> String {
    let snippet = collapse_whitespace(content);
    if snippet.chars().count() <= max_chars {
        return snippet;
    }
    let mut clipped = truncate_chars(&snippet, max_chars.saturating_sub(1));
    clipped.push('…');
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragloop_test_utils::{system_prompt, FnGenerator};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> NodeContext {
        NodeContext::new("test", CancellationToken::new(), Duration::from_secs(5))
    }

    #[test]
    fn test_block_format_and_title_fallback() {
        let evidence = vec![
            EvidenceItem::kb("lang.md", "Python is an\n interpreted   language").with_title("Python"),
            EvidenceItem::new("https://python.org", "Official site"),
        ];
        let block = build_evidence_block(&evidence, 8, 500);
        assert_eq!(
            block,
            "- KB:lang.md :: Python :: Python is an interpreted language\n\
             - WEB:https://python.org :: https://python.org :: Official site"
        );
    }

    #[test]
    fn test_block_dedups_by_source_keeping_position() {
        let evidence = vec![
            EvidenceItem::kb("a.md", "old a"),
            EvidenceItem::kb("b.md", "b"),
            EvidenceItem::new("a.md", "new a"),
        ];
        let block = build_evidence_block(&evidence, 8, 500);
        let lines: Vec<_> = block.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(":: new a"));
        assert!(lines[1].starts_with("- KB:b.md"));
    }

    #[test]
    fn test_block_limits_items_and_clips_snippets() {
        let evidence: Vec<_> = (0..10)
            .map(|i| EvidenceItem::kb(&format!("{i}.md"), "x".repeat(20)))
            .collect();
        let block = build_evidence_block(&evidence, 3, 10);
        let lines: Vec<_> = block.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(&format!("{}…", "x".repeat(9))));
    }

    #[test]
    fn test_empty_block() {
        assert_eq!(build_evidence_block(&[], 8, 500), "(none)");
    }

    #[tokio::test]
    async fn test_prompt_carries_question_and_evidence() {
        let generator = Arc::new(FnGenerator::fixed("  Python은 인터프리터 언어입니다 [KB:lang.md]  "));
        let node = GeneratorNode::new(generator.clone(), 8, 500);
        let mut state = RagState::new(vec![ConversationTurn::user("파이썬이란?")]);
        state.evidence = vec![EvidenceItem::kb("lang.md", "Python is an interpreted language")];

        let update = node.execute(&state, &ctx()).await.unwrap();
        assert_eq!(
            update.answer.as_deref(),
            Some("Python은 인터프리터 언어입니다 [KB:lang.md]")
        );

        let seen = generator.seen();
        assert!(system_prompt(&seen[0]).contains("근거 없음"));
        let user = &seen[0][1].content;
        assert!(user.starts_with("[QUESTION]\n파이썬이란?\n\n[EVIDENCE]\n- KB:lang.md"));
    }

    #[tokio::test]
    async fn test_generation_failure_is_error() {
        let node = GeneratorNode::new(Arc::new(FnGenerator::failing()), 8, 500);
        let state = RagState::new(vec![ConversationTurn::user("q")]);
        assert!(node.execute(&state, &ctx()).await.is_err());
    }

    #[test]
    fn test_fallback_messages() {
        let node = GeneratorNode::new(Arc::new(FnGenerator::failing()), 8, 500);
        let mut state = RagState::default();
        let err = RagError::LlmRequest("down".into());

        let update = node.fallback(&state, &err);
        assert_eq!(update.answer.as_deref(), Some(FALLBACK_NO_EVIDENCE));

        state.evidence = vec![EvidenceItem::kb("lang.md", "Python")];
        let answer = node.fallback(&state, &err).answer.unwrap();
        assert!(answer.starts_with(FALLBACK_WITH_EVIDENCE));
        assert!(answer.contains("- KB:lang.md :: lang.md :: Python"));
    }
}
