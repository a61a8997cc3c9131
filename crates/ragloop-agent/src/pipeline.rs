//! Assembles the seven answering nodes into the self-correcting loop and
//! runs it for one conversation.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use ragloop_core::config::PipelineConfig;
use ragloop_core::error::Result;
use ragloop_core::event::EventBus;
use ragloop_core::traits::{KnowledgeBaseSearch, StructuredClassifier, TextGenerator, WebSearch};
use ragloop_core::types::{normalize_turns, ConversationTurn};

use crate::control::{faithfulness_route, LoopDecision};
use crate::graph::{CompiledGraph, GraphBuilder, GraphLimits, NodeTrace, RagState, END};
use crate::nodes::{
    FaithfulnessNode, GeneratorNode, GraderNode, KbRetrieverNode, RewriteNode, RouterNode,
    WebRetrieverNode,
};

pub const ROUTER: &str = "router";
pub const REWRITE: &str = "rewrite";
pub const RETRIEVE_KB: &str = "retrieve_kb";
pub const RETRIEVE_WEB: &str = "retrieve_web";
pub const GRADE: &str = "grade";
pub const GENERATE: &str = "generate";
pub const CHECK_FAITHFULNESS: &str = "check_faithfulness";

/// External services the nodes talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn TextGenerator>,
    pub classifier: Arc<dyn StructuredClassifier>,
    pub knowledge_base: Arc<dyn KnowledgeBaseSearch>,
    /// `None` when no web search provider is configured.
    pub web: Option<Arc<dyn WebSearch>>,
}

/// Per-run caller options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Allow (`Some(true)`) or forbid (`Some(false)`) web search. When
    /// unset, the router decides.
    pub need_web: Option<bool>,
    /// Rewrite bound; the configured default when unset.
    pub max_steps: Option<u32>,
}

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub state: RagState,
    #[serde(skip)]
    pub traces: Vec<NodeTrace>,
    pub supersteps: usize,
    pub elapsed_ms: u64,
    pub hit_superstep_limit: bool,
}

impl RunReport {
    pub fn answer(&self) -> &str {
        self.state.answer.as_deref().unwrap_or("")
    }

    pub fn faithful(&self) -> Option<bool> {
        self.state.is_faithful()
    }

    /// Nodes whose fallback was merged instead of their own result.
    pub fn degraded_nodes(&self) -> Vec<&str> {
        self.traces
            .iter()
            .filter(|t| t.degraded)
            .map(|t| t.node_id.as_str())
            .collect()
    }
}

/// The answering graph plus its configuration.
pub struct RagPipeline {
    graph: CompiledGraph,
    config: PipelineConfig,
    events: Option<Arc<EventBus>>,
}

impl RagPipeline {
    pub fn new(collaborators: Collaborators, config: PipelineConfig) -> Result<Self> {
        let graph = build_graph(&collaborators, &config)?;
        Ok(Self {
            graph,
            config,
            events: None,
        })
    }

    /// Publish progress events for every run on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Starting state for a conversation.
    pub fn initial_state(&self, messages: Vec<ConversationTurn>, options: &RunOptions) -> RagState {
        let mut state = RagState::new(messages);
        state.need_web = options.need_web.unwrap_or(false);
        state.web_preference = options.need_web;
        state.max_steps = Some(self.config.resolve_max_steps(options.max_steps));
        state
    }

    /// Answer the latest user turn of `messages`.
    pub async fn run(
        &self,
        messages: Vec<ConversationTurn>,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let state = self.initial_state(messages, &options);
        info!(
            run_id = %run_id,
            turns = state.messages.len(),
            max_steps = ?state.max_steps,
            web_preference = ?options.need_web,
            "Starting run"
        );

        let result = self
            .graph
            .invoke(state, &run_id, &cancel, self.events.as_deref())
            .await?;

        info!(
            run_id = %run_id,
            step = result.state.step,
            faithful = ?result.state.is_faithful(),
            supersteps = result.supersteps,
            elapsed_ms = result.total_elapsed_ms,
            "Run finished"
        );
        Ok(RunReport {
            run_id,
            state: result.state,
            traces: result.traces,
            supersteps: result.supersteps,
            elapsed_ms: result.total_elapsed_ms,
            hit_superstep_limit: result.hit_superstep_limit,
        })
    }

    /// Like [`run`](Self::run), for loosely shaped chat messages
    /// (`{"role": ..., "content": ...}` objects).
    pub async fn run_raw(
        &self,
        messages: &[serde_json::Value],
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        self.run(normalize_turns(messages), options, cancel).await
    }
}

/// Wire the answering loop:
///
/// ```text
/// router -> rewrite -> { retrieve_kb, retrieve_web } -> grade -> generate
///        -> check_faithfulness -(retry)-> rewrite
///                              -(terminate)-> END
/// ```
pub fn build_graph(collaborators: &Collaborators, config: &PipelineConfig) -> Result<CompiledGraph> {
    let router = if config.use_router_classifier {
        RouterNode::new(collaborators.classifier.clone())
    } else {
        RouterNode::disabled()
    };
    let grader = if config.use_grader_classifier {
        GraderNode::new(collaborators.classifier.clone(), config.max_evidence)
    } else {
        GraderNode::pass_through(config.max_evidence)
    };
    let checker = if config.faithfulness_judge_enabled() {
        FaithfulnessNode::new(collaborators.classifier.clone())
    } else {
        FaithfulnessNode::heuristic()
    };

    GraphBuilder::new()
        .add_node(ROUTER, router)
        .add_node(
            REWRITE,
            RewriteNode::new(collaborators.generator.clone(), config.max_query_chars),
        )
        .add_node(
            RETRIEVE_KB,
            KbRetrieverNode::new(collaborators.knowledge_base.clone(), config.kb_top_k),
        )
        .add_node(
            RETRIEVE_WEB,
            WebRetrieverNode::new(collaborators.web.clone(), config.web_top_k),
        )
        .add_node(GRADE, grader)
        .add_node(
            GENERATE,
            GeneratorNode::new(
                collaborators.generator.clone(),
                config.max_prompt_items,
                config.max_snippet_chars,
            ),
        )
        .add_node(CHECK_FAITHFULNESS, checker)
        .add_edge(ROUTER, REWRITE)
        .add_edge(REWRITE, RETRIEVE_KB)
        .add_edge(REWRITE, RETRIEVE_WEB)
        .add_edge(RETRIEVE_KB, GRADE)
        .add_edge(RETRIEVE_WEB, GRADE)
        .add_edge(GRADE, GENERATE)
        .add_edge(GENERATE, CHECK_FAITHFULNESS)
        .add_conditional_edge(
            CHECK_FAITHFULNESS,
            faithfulness_route,
            [
                (LoopDecision::RETRY, REWRITE),
                (LoopDecision::TERMINATE, END),
            ],
        )
        .set_entry_point(ROUTER)
        .limits(GraphLimits::from_config(config))
        .compile()
}
