use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use ragloop_core::config::PipelineConfig;
use ragloop_core::error::{RagError, Result};

use super::edge::{Edge, RouteFn, END};
use super::node::Node;
use super::state::MergePolicy;

/// Time and size bounds enforced by the executor.
#[derive(Debug, Clone, Copy)]
pub struct GraphLimits {
    pub call_timeout: Duration,
    pub node_timeout: Duration,
    pub run_timeout: Duration,
    pub max_supersteps: usize,
}

impl Default for GraphLimits {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl GraphLimits {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            node_timeout: Duration::from_secs(config.node_timeout_secs),
            run_timeout: Duration::from_secs(config.run_timeout_secs),
            max_supersteps: config.max_supersteps,
        }
    }
}

/// Declarative graph definition. Validated by [`GraphBuilder::compile`].
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<(String, Arc<dyn Node>)>,
    edges: Vec<Edge>,
    entry: Option<String>,
    policy: MergePolicy,
    limits: GraphLimits,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(mut self, id: impl Into<String>, node: impl Node) -> Self {
        self.nodes.push((id.into(), Arc::new(node)));
        self
    }

    pub fn add_shared_node(mut self, id: impl Into<String>, node: Arc<dyn Node>) -> Self {
        self.nodes.push((id.into(), node));
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge::direct(from, to));
        self
    }

    /// Add a routed edge; `route` picks a label from `routes` after each
    /// superstep in which `from` ran.
    pub fn add_conditional_edge<'a>(
        mut self,
        from: impl Into<String>,
        route: RouteFn,
        routes: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        self.edges.push(Edge::conditional(from, route, routes));
        self
    }

    pub fn set_entry_point(mut self, id: impl Into<String>) -> Self {
        self.entry = Some(id.into());
        self
    }

    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn limits(mut self, limits: GraphLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Validate the definition and freeze it.
    pub fn compile(self) -> Result<CompiledGraph> {
        let mut nodes = HashMap::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        for (id, node) in self.nodes {
            if id == END {
                return Err(RagError::Graph(format!("'{END}' is reserved")));
            }
            if nodes.insert(id.clone(), node).is_some() {
                return Err(RagError::Graph(format!("duplicate node '{id}'")));
            }
            order.push(id);
        }

        let entry = self
            .entry
            .ok_or_else(|| RagError::Graph("no entry point set".into()))?;
        if !nodes.contains_key(&entry) {
            return Err(RagError::Graph(format!("entry point '{entry}' is not a node")));
        }

        for edge in &self.edges {
            if !nodes.contains_key(edge.from()) {
                return Err(RagError::Graph(format!(
                    "edge from unknown node '{}'",
                    edge.from()
                )));
            }
            let targets = edge.targets();
            if targets.is_empty() {
                return Err(RagError::Graph(format!(
                    "conditional edge from '{}' has no routes",
                    edge.from()
                )));
            }
            for to in targets {
                if to != END && !nodes.contains_key(to) {
                    return Err(RagError::Graph(format!(
                        "edge {} -> '{}' targets an unknown node",
                        edge.from(),
                        to
                    )));
                }
            }
        }

        for id in &order {
            let outgoing: Vec<&Edge> = self.edges.iter().filter(|e| e.from() == id).collect();
            let conditional = outgoing.iter().filter(|e| e.is_conditional()).count();
            if conditional > 1 || (conditional == 1 && outgoing.len() > 1) {
                return Err(RagError::Graph(format!(
                    "node '{id}' mixes a conditional edge with other outgoing edges"
                )));
            }
        }

        if let Some(cycle_at) = find_direct_cycle(&order, &self.edges) {
            return Err(RagError::Graph(format!(
                "cycle of unconditional edges through '{cycle_at}'"
            )));
        }

        self.policy.validate()?;

        Ok(CompiledGraph {
            nodes,
            order,
            edges: self.edges,
            entry,
            policy: self.policy,
            limits: self.limits,
        })
    }
}

/// Depth-first search over direct edges only. Loops must pass through a
/// conditional edge so that some routing decision can end them.
fn find_direct_cycle(order: &[String], edges: &[Edge]) -> Option<String> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        if let Edge::Direct { from, to } = edge {
            adjacency.entry(from.as_str()).or_default().push(to.as_str());
        }
    }

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        on_stack: &mut HashSet<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Option<String> {
        if on_stack.contains(node) {
            return Some(node.to_string());
        }
        if !done.insert(node) {
            return None;
        }
        on_stack.insert(node);
        for next in adjacency.get(node).into_iter().flatten() {
            if let Some(found) = visit(next, adjacency, on_stack, done) {
                return Some(found);
            }
        }
        on_stack.remove(node);
        None
    }

    let mut on_stack = HashSet::new();
    let mut done = HashSet::new();
    order
        .iter()
        .find_map(|id| visit(id, &adjacency, &mut on_stack, &mut done))
}

/// A validated graph, ready to run.
pub struct CompiledGraph {
    pub(crate) nodes: HashMap<String, Arc<dyn Node>>,
    /// Node ids in declaration order.
    pub(crate) order: Vec<String>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) entry: String,
    pub(crate) policy: MergePolicy,
    pub(crate) limits: GraphLimits,
}

impl CompiledGraph {
    pub fn entry_point(&self) -> &str {
        &self.entry
    }

    pub fn node_ids(&self) -> &[String] {
        &self.order
    }

    pub fn limits(&self) -> &GraphLimits {
        &self.limits
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    /// Outgoing edges of a node, in declaration order.
    pub(crate) fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from() == id)
    }
}
