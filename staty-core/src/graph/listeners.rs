//! Listener report.

use indexmap::IndexMap;
use serde::Serialize;

use super::arena::Graph;
use super::node::NodeId;

/// Diagnostic count of the handlers registered on a node and its children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Listeners {
    /// Total handlers on this node and every nested node.
    pub count: usize,
    /// Handlers in this node's default bucket.
    pub default: usize,
    /// Handlers per subscribed path on this node.
    pub props: IndexMap<String, usize>,
    /// Reports of nested nodes, by the key they sit under.
    pub children: IndexMap<String, Listeners>,
}

impl Listeners {
    pub(crate) fn collect(graph: &Graph, id: NodeId) -> Option<Self> {
        let node = graph.node(id)?;
        let subscriptions = &node.subscriptions;

        let mut report = Listeners {
            count: subscriptions.total(),
            default: subscriptions.default_count(),
            props: subscriptions
                .prop_counts()
                .map(|(path, n)| (path.to_string(), n))
                .collect(),
            children: IndexMap::new(),
        };

        for (key, child) in node.container.children() {
            if let Some(nested) = Listeners::collect(graph, child) {
                report.count += nested.count;
                report.children.insert(key.segment(), nested);
            }
        }
        Some(report)
    }
}
