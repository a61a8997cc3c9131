use std::collections::HashMap;

use serde::Serialize;

use ragloop_core::error::{RagError, Result};
use ragloop_core::types::*;

/// Shared state of one answering run.
///
/// Nodes read the whole state and return a [`StateUpdate`] with only the
/// fields they change; the executor folds updates in via the [`MergePolicy`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct RagState {
    pub messages: Vec<ConversationTurn>,
    /// Every rewritten query so far, two per rewrite.
    pub queries: Vec<String>,
    pub kb_evidence: Vec<EvidenceItem>,
    pub web_evidence: Vec<EvidenceItem>,
    /// Graded evidence used for generation.
    pub evidence: Vec<EvidenceItem>,
    pub answer: Option<String>,
    pub faithfulness: Option<Faithfulness>,
    /// Number of rewrites performed.
    pub step: u32,
    pub max_steps: Option<u32>,
    pub need_web: bool,
    pub intent: Intent,
    /// Web preference given by the caller for this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_preference: Option<bool>,
}

impl RagState {
    pub fn new(messages: Vec<ConversationTurn>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn last_user_text(&self) -> Option<&str> {
        last_user_text(&self.messages)
    }

    pub fn is_faithful(&self) -> Option<bool> {
        self.faithfulness.as_ref().map(|f| f.faithful)
    }
}

/// Partial update returned by a node. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub messages: Option<Vec<ConversationTurn>>,
    pub queries: Option<Vec<String>>,
    pub kb_evidence: Option<Vec<EvidenceItem>>,
    pub web_evidence: Option<Vec<EvidenceItem>>,
    pub evidence: Option<Vec<EvidenceItem>>,
    pub answer: Option<String>,
    pub faithfulness: Option<Faithfulness>,
    pub step: Option<u32>,
    pub max_steps: Option<u32>,
    pub need_web: Option<bool>,
    pub intent: Option<Intent>,
    pub web_preference: Option<bool>,
}

impl StateUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Field selector for the merge policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    Messages,
    Queries,
    KbEvidence,
    WebEvidence,
    Evidence,
    Answer,
    Faithfulness,
    Step,
    MaxSteps,
    NeedWeb,
    Intent,
    WebPreference,
}

impl StateField {
    pub const ALL: [StateField; 12] = [
        StateField::Messages,
        StateField::Queries,
        StateField::KbEvidence,
        StateField::WebEvidence,
        StateField::Evidence,
        StateField::Answer,
        StateField::Faithfulness,
        StateField::Step,
        StateField::MaxSteps,
        StateField::NeedWeb,
        StateField::Intent,
        StateField::WebPreference,
    ];

    /// Whether the field holds a list that can be appended to.
    pub fn is_sequence(&self) -> bool {
        matches!(
            self,
            StateField::Messages
                | StateField::Queries
                | StateField::KbEvidence
                | StateField::WebEvidence
                | StateField::Evidence
        )
    }
}

/// How an update to a field is combined with the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    Replace,
    Append,
}

/// Per-field merge strategies, fixed when the graph is built.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    strategies: HashMap<StateField, MergeStrategy>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        let strategies = StateField::ALL
            .iter()
            .map(|f| {
                let strategy = match f {
                    StateField::Messages
                    | StateField::Queries
                    | StateField::KbEvidence
                    | StateField::WebEvidence => MergeStrategy::Append,
                    _ => MergeStrategy::Replace,
                };
                (*f, strategy)
            })
            .collect();
        Self { strategies }
    }
}

impl MergePolicy {
    /// Override the strategy for one field.
    pub fn with(mut self, field: StateField, strategy: MergeStrategy) -> Self {
        self.strategies.insert(field, strategy);
        self
    }

    pub fn strategy(&self, field: StateField) -> MergeStrategy {
        self.strategies
            .get(&field)
            .copied()
            .unwrap_or(MergeStrategy::Replace)
    }

    /// Reject `Append` on fields that are not lists.
    pub fn validate(&self) -> Result<()> {
        for (field, strategy) in &self.strategies {
            if *strategy == MergeStrategy::Append && !field.is_sequence() {
                return Err(RagError::Graph(format!(
                    "merge policy declares Append for non-sequence field {:?}",
                    field
                )));
            }
        }
        Ok(())
    }

    /// Fold one update into the state.
    pub fn apply(&self, state: &mut RagState, update: StateUpdate) {
        self.merge_vec(StateField::Messages, &mut state.messages, update.messages);
        self.merge_vec(StateField::Queries, &mut state.queries, update.queries);
        self.merge_vec(StateField::KbEvidence, &mut state.kb_evidence, update.kb_evidence);
        self.merge_vec(StateField::WebEvidence, &mut state.web_evidence, update.web_evidence);
        self.merge_vec(StateField::Evidence, &mut state.evidence, update.evidence);

        if let Some(answer) = update.answer {
            state.answer = Some(answer);
        }
        if let Some(faithfulness) = update.faithfulness {
            state.faithfulness = Some(faithfulness);
        }
        if let Some(step) = update.step {
            state.step = step;
        }
        if let Some(max_steps) = update.max_steps {
            state.max_steps = Some(max_steps);
        }
        if let Some(need_web) = update.need_web {
            state.need_web = need_web;
        }
        if let Some(intent) = update.intent {
            state.intent = intent;
        }
        if let Some(pref) = update.web_preference {
            state.web_preference = Some(pref);
        }
    }

    fn merge_vec<T>(&self, field: StateField, current: &mut Vec<T>, update: Option<Vec<T>>) {
        let Some(values) = update else { return };
        match self.strategy(field) {
            MergeStrategy::Append => current.extend(values),
            MergeStrategy::Replace => *current = values,
        }
    }
}
