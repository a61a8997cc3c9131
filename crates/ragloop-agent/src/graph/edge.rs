use ragloop_core::error::{RagError, Result};

use super::state::RagState;

/// Pseudo-node that ends a branch.
pub const END: &str = "__end__";

/// Routing function of a conditional edge: returns the label of the route
/// to take, evaluated against the merged state after the barrier.
pub type RouteFn = fn(&RagState) -> &'static str;

/// An outgoing edge of a node.
#[derive(Clone)]
pub enum Edge {
    /// Always taken.
    Direct { from: String, to: String },
    /// One of `routes` is taken, chosen by `route`.
    Conditional {
        from: String,
        route: RouteFn,
        /// `(label, target)` pairs.
        routes: Vec<(String, String)>,
    },
}

impl Edge {
    pub fn direct(from: impl Into<String>, to: impl Into<String>) -> Self {
        Edge::Direct {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn conditional<'a>(
        from: impl Into<String>,
        route: RouteFn,
        routes: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        Edge::Conditional {
            from: from.into(),
            route,
            routes: routes
                .into_iter()
                .map(|(label, to)| (label.to_string(), to.to_string()))
                .collect(),
        }
    }

    pub fn from(&self) -> &str {
        match self {
            Edge::Direct { from, .. } | Edge::Conditional { from, .. } => from.as_str(),
        }
    }

    /// Every node this edge can lead to.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Edge::Direct { to, .. } => vec![to.as_str()],
            Edge::Conditional { routes, .. } => routes.iter().map(|(_, to)| to.as_str()).collect(),
        }
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self, Edge::Conditional { .. })
    }

    /// Resolve the target for the given state.
    pub fn resolve(&self, state: &RagState) -> Result<&str> {
        match self {
            Edge::Direct { to, .. } => Ok(to.as_str()),
            Edge::Conditional {
                from,
                route,
                routes,
            } => {
                let label = route(state);
                routes
                    .iter()
                    .find(|(l, _)| l == label)
                    .map(|(_, to)| to.as_str())
                    .ok_or_else(|| {
                        RagError::Graph(format!(
                            "conditional edge from '{from}' returned unknown route '{label}'"
                        ))
                    })
            }
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct { from, to } => write!(f, "{from} -> {to}"),
            Edge::Conditional { from, routes, .. } => {
                write!(f, "{from} -> ?{routes:?}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by_web(state: &RagState) -> &'static str {
        if state.need_web {
            "web"
        } else {
            "done"
        }
    }

    fn bogus(_: &RagState) -> &'static str {
        "nowhere"
    }

    #[test]
    fn test_direct_edge() {
        let e = Edge::direct("a", "b");
        assert_eq!(e.from(), "a");
        assert_eq!(e.targets(), vec!["b"]);
        assert!(!e.is_conditional());
        assert_eq!(e.resolve(&RagState::default()).unwrap(), "b");
    }

    #[test]
    fn test_conditional_edge_resolves_by_label() {
        let e = Edge::conditional("a", by_web, [("web", "search"), ("done", END)]);
        assert!(e.is_conditional());
        assert_eq!(e.targets(), vec!["search", END]);

        let mut state = RagState::default();
        assert_eq!(e.resolve(&state).unwrap(), END);
        state.need_web = true;
        assert_eq!(e.resolve(&state).unwrap(), "search");
    }

    #[test]
    fn test_unknown_route_label_is_graph_error() {
        let e = Edge::conditional("a", bogus, [("x", "b")]);
        assert!(matches!(e.resolve(&RagState::default()), Err(RagError::Graph(_))));
    }
}
