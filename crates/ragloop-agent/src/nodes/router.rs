use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::{ClassificationRequest, StructuredClassifier};
use ragloop_core::types::Intent;

use crate::graph::{Node, NodeContext, RagState, StateUpdate};

const INSTRUCTIONS: &str = "Classify the user's latest message. Return STRICT JSON with keys \
intent (one of 'followup', 'new_topic', 'ambiguous', 'task') and need_web (true/false). \
need_web is true only when answering requires current information from the web.";

/// Classifies intent and decides whether web search is needed.
///
/// The caller's web preference always wins: a recommendation to search the
/// web is ignored when the caller turned web search off.
pub struct RouterNode {
    classifier: Option<Arc<dyn StructuredClassifier>>,
}

impl RouterNode {
    pub fn new(classifier: Arc<dyn StructuredClassifier>) -> Self {
        Self {
            classifier: Some(classifier),
        }
    }

    /// A router that never calls a model and keeps the state's values.
    pub fn disabled() -> Self {
        Self { classifier: None }
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "intent": {
                    "type": "string",
                    "enum": ["followup", "new_topic", "ambiguous", "task"]
                },
                "need_web": { "type": "boolean" }
            },
            "required": ["intent", "need_web"]
        })
    }

    fn echo(state: &RagState) -> StateUpdate {
        StateUpdate {
            intent: Some(state.intent),
            need_web: Some(state.need_web),
            ..Default::default()
        }
    }

    fn parse(value: &Value) -> Result<(Intent, bool)> {
        let intent = match value.get("intent") {
            None | Some(Value::Null) => Intent::default(),
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| RagError::LlmParse(format!("router intent: {e}")))?,
        };
        let need_web = value
            .get("need_web")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok((intent, need_web))
    }
}

impl Node for RouterNode {
    fn name(&self) -> &str {
        "router"
    }

    fn execute<'a>(
        &'a self,
        state: &'a RagState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let Some(classifier) = &self.classifier else {
                return Ok(Self::echo(state));
            };
            let Some(question) = state.last_user_text() else {
                debug!("No user turn to classify");
                return Ok(Self::echo(state));
            };

            let request = ClassificationRequest {
                instructions: INSTRUCTIONS.to_string(),
                input: question.to_string(),
                schema: Self::schema(),
            };
            let value = ctx
                .call("router.classify", classifier.classify(&request))
                .await?;
            let (intent, recommended) = Self::parse(&value)?;
            let need_web = recommended && state.web_preference.unwrap_or(true);
            debug!(?intent, recommended, need_web, "Routed");

            Ok(StateUpdate {
                intent: Some(intent),
                need_web: Some(need_web),
                ..Default::default()
            })
        })
    }

    fn fallback(&self, state: &RagState, _error: &RagError) -> StateUpdate {
        Self::echo(state)
    }
}
