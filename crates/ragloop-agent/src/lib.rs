pub mod control;
pub mod graph;
pub mod nodes;
pub mod pipeline;

pub use control::{route_after_faithfulness, LoopDecision};
pub use graph::{
    CompiledGraph, ExecutionResult, GraphBuilder, GraphLimits, MergePolicy, MergeStrategy, Node,
    NodeContext, NodeTrace, RagState, StateField, StateUpdate, END,
};
pub use pipeline::{Collaborators, RagPipeline, RunOptions, RunReport};
