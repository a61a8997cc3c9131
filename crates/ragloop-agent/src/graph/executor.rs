use std::time::Instant;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ragloop_core::error::{RagError, Result};
use ragloop_core::event::EventBus;
use ragloop_core::types::GraphEvent;

use super::builder::CompiledGraph;
use super::edge::END;
use super::node::NodeContext;
use super::state::{RagState, StateUpdate};

/// Result of running a single node.
#[derive(Debug, Clone)]
pub struct NodeTrace {
    /// Which node was executed.
    pub node_id: String,
    /// Superstep the node ran in (0-based).
    pub superstep: usize,
    /// Whether `execute` returned an update.
    pub succeeded: bool,
    /// Whether the fallback update was merged instead.
    pub degraded: bool,
    /// Execution time in milliseconds.
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Result of running the whole graph.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub state: RagState,
    /// Per-node traces in merge order.
    pub traces: Vec<NodeTrace>,
    pub supersteps: usize,
    pub total_elapsed_ms: u64,
    /// The run stopped at the superstep ceiling rather than an empty frontier.
    pub hit_superstep_limit: bool,
}

impl CompiledGraph {
    /// Run the graph from its entry point until no node is left to run.
    ///
    /// Fails only with [`RagError::Cancelled`] when `cancel` fires,
    /// [`RagError::RunTimeout`] when the run budget is exhausted, or
    /// [`RagError::Graph`] when a conditional edge picks an undeclared route.
    /// Dropping the in-flight frontier future cancels every pending branch.
    pub async fn invoke(
        &self,
        state: RagState,
        run_id: &str,
        cancel: &CancellationToken,
        events: Option<&EventBus>,
    ) -> Result<ExecutionResult> {
        let publish = |event: GraphEvent| {
            if let Some(bus) = events {
                bus.publish(event);
            }
        };
        publish(GraphEvent::RunStarted {
            run_id: run_id.to_string(),
        });

        let run_timeout = self.limits.run_timeout;
        let run = self.run_supersteps(state, run_id, cancel, &publish);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(run_id, "Run cancelled");
                Err(RagError::Cancelled)
            }
            outcome = tokio::time::timeout(run_timeout, run) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    warn!(run_id, timeout_secs = run_timeout.as_secs(), "Run timed out");
                    Err(RagError::RunTimeout(run_timeout.as_secs()))
                }
            },
        };

        if let Ok(done) = &result {
            publish(GraphEvent::RunFinished {
                run_id: run_id.to_string(),
                supersteps: done.supersteps,
                step: done.state.step,
                faithful: done.state.is_faithful(),
            });
        }
        result
    }

    async fn run_supersteps(
        &self,
        mut state: RagState,
        run_id: &str,
        cancel: &CancellationToken,
        publish: &(dyn Fn(GraphEvent) + Sync),
    ) -> Result<ExecutionResult> {
        let start = Instant::now();
        let ctx = NodeContext::new(run_id, cancel.clone(), self.limits.call_timeout);
        let mut traces = Vec::new();
        let mut frontier = vec![self.entry.clone()];
        let mut superstep = 0usize;
        let mut hit_superstep_limit = false;

        while !frontier.is_empty() {
            if superstep >= self.limits.max_supersteps {
                warn!(
                    run_id,
                    max_supersteps = self.limits.max_supersteps,
                    pending = ?frontier,
                    "Superstep ceiling reached, terminating graph"
                );
                hit_superstep_limit = true;
                break;
            }

            debug!(run_id, superstep, nodes = ?frontier, "Starting superstep");
            publish(GraphEvent::Superstep {
                index: superstep,
                nodes: frontier.clone(),
            });

            // Barrier: every branch completes before anything is merged
            let outcomes = join_all(
                frontier
                    .iter()
                    .map(|id| self.run_node(id, superstep, &state, &ctx, publish)),
            )
            .await;

            for (update, trace) in outcomes {
                self.policy.apply(&mut state, update);
                traces.push(trace);
            }

            let mut next: Vec<String> = Vec::new();
            for id in &frontier {
                for edge in self.outgoing(id) {
                    let target = edge.resolve(&state)?;
                    if target != END && !next.iter().any(|n| n == target) {
                        next.push(target.to_string());
                    }
                }
            }
            frontier = next;
            superstep += 1;
        }

        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            run_id,
            supersteps = superstep,
            step = state.step,
            elapsed_ms = total_elapsed_ms,
            "Graph run complete"
        );

        Ok(ExecutionResult {
            state,
            traces,
            supersteps: superstep,
            total_elapsed_ms,
            hit_superstep_limit,
        })
    }

    /// Run one node under the node timeout, substituting its fallback on
    /// failure.
    async fn run_node(
        &self,
        id: &str,
        superstep: usize,
        state: &RagState,
        ctx: &NodeContext,
        publish: &(dyn Fn(GraphEvent) + Sync),
    ) -> (StateUpdate, NodeTrace) {
        let started = Instant::now();
        publish(GraphEvent::NodeStarted {
            node: id.to_string(),
        });

        let result = match self.nodes.get(id) {
            Some(node) => {
                let outcome =
                    tokio::time::timeout(self.limits.node_timeout, node.execute(state, ctx)).await;
                let result = match outcome {
                    Ok(result) => result,
                    Err(_) => Err(RagError::Node {
                        node: id.to_string(),
                        message: format!(
                            "timed out after {}s",
                            self.limits.node_timeout.as_secs()
                        ),
                    }),
                };
                result.map_err(|e| {
                    warn!(node = %id, error = %e, "Node failed, applying fallback");
                    let fallback = node.fallback(state, &e);
                    (e, fallback)
                })
            }
            None => {
                // compile() guarantees every edge target exists
                let e = RagError::Graph(format!("node '{id}' not found"));
                Err((e, StateUpdate::default()))
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let (update, succeeded, error) = match result {
            Ok(update) => (update, true, None),
            Err((e, fallback)) => (fallback, false, Some(e.to_string())),
        };
        debug!(node = %id, succeeded, elapsed_ms, "Node execution complete");
        publish(GraphEvent::NodeFinished {
            node: id.to_string(),
            elapsed_ms,
            degraded: !succeeded,
        });

        let trace = NodeTrace {
            node_id: id.to_string(),
            superstep,
            succeeded,
            degraded: !succeeded,
            elapsed_ms,
            error,
        };
        (update, trace)
    }
}
