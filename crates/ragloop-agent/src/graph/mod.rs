//! Graph Execution Engine: superstep execution over a typed shared state.
//!
//! A graph is a set of named [`Node`]s joined by direct and conditional
//! edges. The executor runs the current frontier of nodes concurrently,
//! waits for all of them (the barrier), merges their partial updates into
//! the [`RagState`] in declaration order under a [`MergePolicy`], then
//! resolves outgoing edges against the merged state to form the next
//! frontier. A run ends when the frontier is empty.

pub mod builder;
pub mod edge;
pub mod executor;
pub mod node;
pub mod state;

pub use builder::{CompiledGraph, GraphBuilder, GraphLimits};
pub use edge::{Edge, RouteFn, END};
pub use executor::{ExecutionResult, NodeTrace};
pub use node::{Node, NodeContext};
pub use state::{MergePolicy, MergeStrategy, RagState, StateField, StateUpdate};
