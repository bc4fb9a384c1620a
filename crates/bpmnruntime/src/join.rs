use crate::graph::{JoinKind, ProcessGraph};
use std::collections::HashMap;

/// Arrivals at one synchronising node, counted per incoming flow.
#[derive(Debug, Default, Clone)]
struct JoinRecord {
    arrivals: HashMap<usize, usize>,
}

impl JoinRecord {
    fn has_arrived(&self, flow: usize) -> bool {
        self.arrivals.get(&flow).copied().unwrap_or(0) > 0
    }

    /// Take one arrival from every flow that has one.
    fn consume(&mut self) {
        self.arrivals.retain(|_, count| {
            *count -= 1;
            *count > 0
        });
    }
}

/// Tracks token arrivals at synchronising joins for one execution.
#[derive(Debug, Default)]
pub struct JoinCoordinator {
    records: HashMap<usize, JoinRecord>,
}

impl JoinCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a token arriving at `node` along `flow`.
    pub fn arrive(&mut self, node: usize, flow: usize) {
        *self
            .records
            .entry(node)
            .or_default()
            .arrivals
            .entry(flow)
            .or_insert(0) += 1;
    }

    /// Release the join if its arrivals are satisfied, consuming them.
    ///
    /// `live` holds the positions of every other live token in the run; it is
    /// only consulted by inclusive joins.
    pub fn try_release(
        &mut self,
        graph: &ProcessGraph,
        node: usize,
        kind: JoinKind,
        live: &[usize],
    ) -> bool {
        let Some(record) = self.records.get_mut(&node) else {
            return false;
        };
        let incoming = graph.incoming(node);

        let satisfied = match kind {
            JoinKind::Parallel => incoming.iter().all(|f| record.has_arrived(*f)),
            JoinKind::Inclusive => {
                !record.arrivals.is_empty()
                    && incoming
                        .iter()
                        .filter(|f| !record.has_arrived(**f))
                        .all(|f| {
                            let source = graph.flow_source(*f);
                            !live.iter().any(|pos| graph.can_reach(*pos, source))
                        })
            }
        };

        if satisfied {
            record.consume();
            if record.arrivals.is_empty() {
                self.records.remove(&node);
            }
        }
        satisfied
    }

    /// Nodes that currently hold buffered arrivals.
    pub fn pending(&self) -> Vec<usize> {
        let mut nodes: Vec<usize> = self.records.keys().copied().collect();
        nodes.sort_unstable();
        nodes
    }

    pub fn arrivals(&self, node: usize) -> usize {
        self.records
            .get(&node)
            .map(|r| r.arrivals.values().sum())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpmncore::{Definition, NodeKind, NodeSpec};
    use std::sync::Arc;

    fn graph(join_kind: NodeKind) -> ProcessGraph {
        let mut def = Definition::new("p");
        def.add_node(NodeSpec::start("start"));
        def.add_node(NodeSpec::new("fork", NodeKind::InclusiveGateway));
        def.add_node(NodeSpec::new("a", NodeKind::Task));
        def.add_node(NodeSpec::new("b", NodeKind::Task));
        def.add_node(NodeSpec::new("join", join_kind));
        def.add_node(NodeSpec::end("end"));
        def.connect("f0", "start", "fork");
        def.connect("f1", "fork", "a");
        def.connect("f2", "fork", "b");
        def.connect("f3", "a", "join");
        def.connect("f4", "b", "join");
        def.connect("f5", "join", "end");
        ProcessGraph::build(Arc::new(def)).unwrap()
    }

    #[test]
    fn parallel_join_waits_for_every_incoming_flow() {
        let g = graph(NodeKind::ParallelGateway);
        let join = g.node_position("join").unwrap();
        let f3 = g.flow_position("f3").unwrap();
        let f4 = g.flow_position("f4").unwrap();
        let mut joins = JoinCoordinator::new();

        joins.arrive(join, f3);
        assert!(!joins.try_release(&g, join, JoinKind::Parallel, &[]));
        assert_eq!(joins.arrivals(join), 1);

        joins.arrive(join, f4);
        assert!(joins.try_release(&g, join, JoinKind::Parallel, &[]));
        assert_eq!(joins.arrivals(join), 0);
        assert!(joins.pending().is_empty());
    }

    #[test]
    fn release_consumes_one_round_only() {
        let g = graph(NodeKind::ParallelGateway);
        let join = g.node_position("join").unwrap();
        let f3 = g.flow_position("f3").unwrap();
        let f4 = g.flow_position("f4").unwrap();
        let mut joins = JoinCoordinator::new();

        joins.arrive(join, f3);
        joins.arrive(join, f3);
        joins.arrive(join, f4);
        assert!(joins.try_release(&g, join, JoinKind::Parallel, &[]));
        assert_eq!(joins.arrivals(join), 1);
        assert!(!joins.try_release(&g, join, JoinKind::Parallel, &[]));
    }

    #[test]
    fn inclusive_join_waits_only_while_a_branch_can_still_arrive() {
        let g = graph(NodeKind::InclusiveGateway);
        let join = g.node_position("join").unwrap();
        let b = g.node_position("b").unwrap();
        let end = g.node_position("end").unwrap();
        let f3 = g.flow_position("f3").unwrap();
        let mut joins = JoinCoordinator::new();

        joins.arrive(join, f3);
        // A token still sits on the other branch.
        assert!(!joins.try_release(&g, join, JoinKind::Inclusive, &[b]));
        // Tokens elsewhere that cannot reach the join's open flows do not block.
        assert!(joins.try_release(&g, join, JoinKind::Inclusive, &[end]));
    }

    #[test]
    fn inclusive_join_without_arrivals_never_releases() {
        let g = graph(NodeKind::InclusiveGateway);
        let join = g.node_position("join").unwrap();
        let mut joins = JoinCoordinator::new();
        assert!(!joins.try_release(&g, join, JoinKind::Inclusive, &[]));
    }
}
