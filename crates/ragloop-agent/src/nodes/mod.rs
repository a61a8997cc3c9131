//! The seven nodes of the answering graph.
//!
//! Each node owns its collaborators and settings, wraps every external call
//! in [`NodeContext::call`](crate::graph::NodeContext::call), and has a
//! fallback that cannot fail.

pub mod faithfulness;
pub mod generate;
pub mod grader;
pub mod retrieve;
pub mod rewrite;
pub mod router;

pub use faithfulness::{check_heuristics, extract_citations, FaithfulnessNode};
pub use generate::{build_evidence_block, GeneratorNode};
pub use grader::GraderNode;
pub use retrieve::{KbRetrieverNode, WebRetrieverNode};
pub use rewrite::{parse_queries, sanitize_queries, RewriteNode};
pub use router::RouterNode;

use std::collections::HashMap;

use ragloop_core::types::EvidenceItem;

/// Collapse every whitespace run to a single space and trim.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `max_chars` characters of `text`.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// One item per normalized source. A repeated source keeps the position of
/// its first occurrence and the content of its last.
pub fn dedup_by_source<I>(items: I) -> Vec<EvidenceItem>
where
    I: IntoIterator<Item = EvidenceItem>,
{
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<EvidenceItem> = Vec::new();
    for item in items {
        let key = item.normalized_source();
        match positions.get(&key) {
            Some(&idx) => unique[idx] = item,
            None => {
                positions.insert(key, unique.len());
                unique.push(item);
            }
        }
    }
    unique
}
